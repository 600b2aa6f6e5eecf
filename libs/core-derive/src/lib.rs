//! Talk Core Derive - compile-time method descriptions
//!
//! `#[service]` goes on an inherent `impl` block and emits a
//! `talk_core::Service` implementation describing every `pub` method taking
//! `&self`: its name, parameter and result type descriptors, doc lines, and
//! an invoker when the signature has a callable shape.
//!
//! Callable shapes, after `&self`:
//!
//! - `(ctx)`
//! - `(ctx, request)`
//! - `(ctx, inbound: Receiver<T>)`
//! - `(ctx, request, inbound: Receiver<T>)`
//!
//! returning `Result<T, E>` (sync or async). `T` may be a `Receiver<U>` for
//! server streaming. Requests may be taken by reference (`&str`, `&T`).
//!
//! Methods may carry `#[talk(path = "...", method = "...", stream = "...", skip)]`;
//! the attribute is removed and rendered as an `@talk` doc line.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{
    parse_macro_input, Attribute, Expr, FnArg, GenericArgument, ImplItem, ImplItemFn, ItemImpl,
    Lit, Meta, PathArguments, ReturnType, Token, Type, Visibility,
};

#[proc_macro_attribute]
pub fn service(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item = parse_macro_input!(input as ItemImpl);
    match expand(args.into(), &mut item) {
        Ok(tokens) => tokens.into(),
        Err(err) => {
            let err = err.to_compile_error();
            quote!(#item #err).into()
        }
    }
}

fn expand(args: TokenStream2, item: &mut ItemImpl) -> syn::Result<TokenStream2> {
    if let Some((_, path, _)) = &item.trait_ {
        return Err(syn::Error::new_spanned(
            path,
            "#[service] goes on an inherent impl block",
        ));
    }

    let name = match service_name_arg(args)? {
        Some(name) => name,
        None => type_name(&item.self_ty),
    };

    let mut methods = Vec::new();
    for impl_item in item.items.iter_mut() {
        if let ImplItem::Fn(func) = impl_item {
            let talk = take_talk_attrs(&mut func.attrs)?;
            if let Some(tokens) = describe_method(func, talk)? {
                methods.push(tokens);
            }
        }
    }

    let self_ty = &item.self_ty;
    let (impl_generics, _, where_clause) = item.generics.split_for_impl();

    Ok(quote! {
        #item

        impl #impl_generics ::talk_core::Service for #self_ty #where_clause {
            fn service_name(&self) -> &str {
                #name
            }

            fn methods(
                self: ::std::sync::Arc<Self>,
            ) -> ::std::vec::Vec<::talk_core::MethodInfo> {
                let mut methods = ::std::vec::Vec::new();
                #(methods.push(#methods);)*
                methods
            }
        }
    })
}

/// `#[service(name = "Users")]`
fn service_name_arg(args: TokenStream2) -> syn::Result<Option<String>> {
    if args.is_empty() {
        return Ok(None);
    }
    let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse2(args)?;
    let mut name = None;
    for meta in metas {
        match meta {
            Meta::NameValue(nv) if nv.path.is_ident("name") => name = Some(literal(&nv.value)?),
            other => return Err(syn::Error::new_spanned(other, "expected `name = \"...\"`")),
        }
    }
    Ok(name)
}

fn type_name(ty: &Type) -> String {
    match ty {
        Type::Path(p) => p
            .path
            .segments
            .last()
            .map(|s| s.ident.to_string())
            .unwrap_or_default(),
        other => quote!(#other).to_string(),
    }
}

/// Remove `#[talk(..)]` attributes and render them as `@talk` lines.
fn take_talk_attrs(attrs: &mut Vec<Attribute>) -> syn::Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut kept = Vec::with_capacity(attrs.len());
    for attr in attrs.drain(..) {
        if !attr.path().is_ident("talk") {
            kept.push(attr);
            continue;
        }
        let metas = attr.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
        let mut tokens = Vec::new();
        for meta in metas {
            match meta {
                Meta::Path(path) => tokens.push(path_key(&path)?),
                Meta::NameValue(nv) => {
                    let value = literal(&nv.value)?;
                    tokens.push(format!("{}=\"{}\"", path_key(&nv.path)?, value));
                }
                Meta::List(list) => {
                    return Err(syn::Error::new_spanned(list, "nested lists are not supported"))
                }
            }
        }
        lines.push(format!("@talk {}", tokens.join(" ")));
    }
    *attrs = kept;
    Ok(lines)
}

fn path_key(path: &syn::Path) -> syn::Result<String> {
    path.get_ident()
        .map(|i| i.to_string())
        .ok_or_else(|| syn::Error::new_spanned(path, "expected a single identifier"))
}

fn literal(expr: &Expr) -> syn::Result<String> {
    match expr {
        Expr::Lit(lit) => match &lit.lit {
            Lit::Str(s) => Ok(s.value()),
            Lit::Bool(b) => Ok(b.value.to_string()),
            Lit::Int(i) => Ok(i.base10_digits().to_string()),
            other => Err(syn::Error::new_spanned(other, "unsupported literal")),
        },
        Expr::Path(p) => p
            .path
            .get_ident()
            .map(|i| i.to_string())
            .ok_or_else(|| syn::Error::new_spanned(p, "expected an identifier")),
        other => Err(syn::Error::new_spanned(other, "expected a literal")),
    }
}

fn doc_lines(attrs: &[Attribute]) -> Vec<String> {
    attrs
        .iter()
        .filter(|a| a.path().is_ident("doc"))
        .filter_map(|a| match &a.meta {
            Meta::NameValue(nv) => literal(&nv.value).ok(),
            _ => None,
        })
        .collect()
}

fn describe_method(func: &ImplItemFn, talk: Vec<String>) -> syn::Result<Option<TokenStream2>> {
    if !matches!(func.vis, Visibility::Public(_)) {
        return Ok(None);
    }
    let Some(FnArg::Receiver(receiver)) = func.sig.inputs.first() else {
        return Ok(None);
    };
    if receiver.reference.is_none() {
        return Ok(None);
    }

    let name = func.sig.ident.to_string();
    let params: Vec<&Type> = func
        .sig
        .inputs
        .iter()
        .filter_map(|arg| match arg {
            FnArg::Typed(pat) => Some(pat.ty.as_ref()),
            FnArg::Receiver(_) => None,
        })
        .collect();

    let param_descs = params.iter().map(|ty| describe_type(ty));
    let result_descs = describe_return(&func.sig.output);
    let docs = doc_lines(&func.attrs).into_iter().chain(talk);

    let invoke = if receiver.mutability.is_none() && func.sig.generics.params.is_empty() {
        invoker_for(func, &params)
    } else {
        None
    };
    let invoke = invoke.map(|tokens| quote!(.invoke_with(#tokens)));

    Ok(Some(quote! {
        ::talk_core::MethodInfo::new(#name)
            #(.param(#param_descs))*
            #(.result(#result_descs))*
            #(.doc(#docs))*
            #invoke
    }))
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(p) if p.qself.is_none() => p.path.segments.last(),
        _ => None,
    }
}

fn generic_args(seg: &syn::PathSegment) -> Vec<&Type> {
    match &seg.arguments {
        PathArguments::AngleBracketed(args) => args
            .args
            .iter()
            .filter_map(|a| match a {
                GenericArgument::Type(ty) => Some(ty),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn is_unit(ty: &Type) -> bool {
    matches!(ty, Type::Tuple(t) if t.elems.is_empty())
}

fn is_named(ty: &Type, name: &str) -> bool {
    match ty {
        Type::Reference(r) => is_named(&r.elem, name),
        _ => last_segment(ty).is_some_and(|s| s.ident == name),
    }
}

/// Element type of a `Receiver<T>`.
fn channel_elem(ty: &Type) -> Option<&Type> {
    let seg = last_segment(ty)?;
    if seg.ident != "Receiver" {
        return None;
    }
    generic_args(seg).into_iter().next()
}

fn describe_type(ty: &Type) -> TokenStream2 {
    let desc = quote!(::talk_core::descriptor::TypeDescriptor);
    match ty {
        Type::Reference(r) => return describe_type(&r.elem),
        Type::Paren(p) => return describe_type(&p.elem),
        Type::Tuple(t) if t.elems.is_empty() => return quote!(#desc::unit()),
        Type::Slice(s) => {
            let elem = describe_type(&s.elem);
            return quote!(#desc::list(#elem));
        }
        Type::Array(a) => {
            let elem = describe_type(&a.elem);
            return quote!(#desc::list(#elem));
        }
        _ => {}
    }

    let Some(seg) = last_segment(ty) else {
        let text = quote!(#ty).to_string();
        return quote!(#desc::named(#text));
    };
    let ident = seg.ident.to_string();
    let args = generic_args(seg);
    match ident.as_str() {
        "String" | "str" | "char" => quote!(#desc::string()),
        "i8" | "i16" | "i32" | "i64" | "i128" | "isize" => quote!(#desc::int(#ident)),
        "u8" | "u16" | "u32" | "u64" | "u128" | "usize" => quote!(#desc::uint(#ident)),
        "f32" | "f64" => quote!(#desc::float(#ident)),
        "bool" => quote!(#desc::bool()),
        "Context" => quote!(#desc::context()),
        "Receiver" | "Vec" | "VecDeque" | "HashSet" | "BTreeSet" | "Option" | "Box" | "Arc"
            if !args.is_empty() =>
        {
            let inner = describe_type(args[0]);
            match ident.as_str() {
                "Receiver" => quote!(#desc::channel(#inner)),
                "Option" | "Box" | "Arc" => inner,
                _ => quote!(#desc::list(#inner)),
            }
        }
        "HashMap" | "BTreeMap" if args.len() == 2 => {
            let value = describe_type(args[1]);
            quote!(#desc::map(#value))
        }
        _ => quote!(#desc::named(#ident)),
    }
}

fn describe_return(output: &ReturnType) -> Vec<TokenStream2> {
    let ty = match output {
        ReturnType::Default => return Vec::new(),
        ReturnType::Type(_, ty) => ty.as_ref(),
    };
    if is_unit(ty) {
        return Vec::new();
    }
    match last_segment(ty) {
        Some(seg) if seg.ident == "Result" => {
            let mut results = Vec::new();
            if let Some(ok) = generic_args(seg).first() {
                if !is_unit(ok) {
                    results.push(describe_type(ok));
                }
            }
            results.push(quote!(::talk_core::descriptor::TypeDescriptor::error()));
            results
        }
        _ => vec![describe_type(ty)],
    }
}

/// `Ok` type of a `Result` return, when the method returns one.
fn result_ok(output: &ReturnType) -> Option<Type> {
    let ReturnType::Type(_, ty) = output else {
        return None;
    };
    let seg = last_segment(ty)?;
    if seg.ident != "Result" {
        return None;
    }
    Some(
        generic_args(seg)
            .first()
            .map(|t| (*t).clone())
            .unwrap_or_else(|| syn::parse_quote!(())),
    )
}

/// Owned type decoded for a parameter, and whether the call borrows it.
fn owned_param(ty: &Type) -> (Type, bool) {
    match ty {
        Type::Reference(r) => {
            let owned = match r.elem.as_ref() {
                Type::Path(p) if p.path.is_ident("str") => syn::parse_quote!(::std::string::String),
                Type::Slice(s) => {
                    let elem = &s.elem;
                    syn::parse_quote!(::std::vec::Vec<#elem>)
                }
                other => other.clone(),
            };
            (owned, true)
        }
        other => (other.clone(), false),
    }
}

fn invoker_for(func: &ImplItemFn, params: &[&Type]) -> Option<TokenStream2> {
    let (ctx_ty, rest) = params.split_first()?;
    if !is_named(ctx_ty, "Context") {
        return None;
    }
    let ok_ty = result_ok(&func.sig.output)?;

    let ctx_arg = if matches!(ctx_ty, Type::Reference(_)) {
        quote!(&__ctx)
    } else {
        quote!(__ctx)
    };

    let mut prelude = Vec::new();
    let mut call_args = vec![ctx_arg];
    let mut needs_mut = false;
    for (i, ty) in rest.iter().enumerate() {
        let is_last = i + 1 == rest.len();
        if let Some(elem) = channel_elem(ty) {
            if !is_last {
                return None;
            }
            needs_mut = true;
            prelude.push(quote!(let __inbound = __args.inbound::<#elem>();));
            call_args.push(quote!(__inbound));
        } else {
            if i != 0 {
                return None;
            }
            let (owned, by_ref) = owned_param(ty);
            prelude.push(quote!(let __req: #owned = __args.request()?;));
            call_args.push(if by_ref { quote!(&__req) } else { quote!(__req) });
        }
    }
    if rest.len() > 2 {
        return None;
    }

    let ident = &func.sig.ident;
    let call = if func.sig.asyncness.is_some() {
        quote!(__this.#ident(#(#call_args),*).await)
    } else {
        quote!(__this.#ident(#(#call_args),*))
    };
    let output = if channel_elem(&ok_ty).is_some() {
        quote!(::talk_core::extract::Output::channel(__value))
    } else {
        quote!(::talk_core::extract::Output::value(__value))
    };
    let args_binding = if needs_mut {
        quote!(mut __args)
    } else {
        quote!(__args)
    };
    Some(quote! {{
        let __this = ::std::sync::Arc::clone(&self);
        ::talk_core::extract::invoker(
            move |__ctx: ::talk_core::Context, #args_binding: ::talk_core::extract::Args| {
                let __this = ::std::sync::Arc::clone(&__this);
                async move {
                    #(#prelude)*
                    match #call {
                        ::std::result::Result::Ok(__value) => #output,
                        ::std::result::Result::Err(__err) => ::std::result::Result::Err(
                            ::talk_core::extract::method_error(__err),
                        ),
                    }
                }
            },
        )
    }})
}
