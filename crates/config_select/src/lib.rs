//! Compile-time selection of items from the build configuration.

use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream, Result};
use syn::{LitStr, Path, Token};

/// A proc macro to select one path based on an environment variable.
///
/// Each arm lists one or more values separated by `|`, the `_` arm is taken when the variable is
/// unset or matches no other arm.
///
/// Usage:
///
/// ```rs
/// pub type Plat = select_env!["MEMPROBE_PLATFORM_NAME":
///     "bsp" | "mvme5500" => bsp::BspPlatform
///     _                  => generic::GenericPlatform
/// ];
/// ```
#[proc_macro]
pub fn select_env(tokens: TokenStream) -> TokenStream {
    let select_macro: SelectMacro = match syn::parse(tokens) {
        Ok(select_macro) => select_macro,
        Err(err) => return err.to_compile_error().into(),
    };
    let env = std::env::var(&select_macro.env_var).ok();

    match select_macro.select(env.as_deref()) {
        Some(target) => TokenStream::from(quote!(#target)),
        None => {
            let msg = match &env {
                Some(env) => format!(
                    "Environment variable '{}' has value '{}' which doesn't match any case",
                    &select_macro.env_var, env
                ),
                None => format!(
                    "Environment variable '{}' is not set, but there is no default case",
                    &select_macro.env_var
                ),
            };
            TokenStream::from(quote!(compile_error!(#msg)))
        }
    }
}

struct SelectMacro {
    env_var: String,
    arms: Vec<ChoiceArm>,
}

impl SelectMacro {
    /// The target of the first arm matching `env`, or of the default arm.
    fn select(&self, env: Option<&str>) -> Option<&Path> {
        if let Some(env) = env {
            let arm = self
                .arms
                .iter()
                .find(|arm| arm.items.iter().any(|item| item == env));
            if let Some(arm) = arm {
                return Some(&arm.target);
            }
        }

        self.arms
            .iter()
            .find(|arm| arm.items.is_empty())
            .map(|arm| &arm.target)
    }
}

impl Parse for SelectMacro {
    fn parse(input: ParseStream) -> Result<Self> {
        let env_var = input.parse::<LitStr>()?;
        input.parse::<Token![:]>()?;
        let mut arms = Vec::new();
        while !input.is_empty() {
            arms.push(input.parse::<ChoiceArm>()?);
        }
        Ok(Self {
            env_var: env_var.value(),
            arms,
        })
    }
}

/// `"a" | "b" => path`, or `_ => path` when `items` is empty.
struct ChoiceArm {
    items: Vec<String>,
    target: Path,
}

impl Parse for ChoiceArm {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut items = Vec::new();
        if input.parse::<Token![_]>().is_err() {
            items.push(input.parse::<LitStr>()?.value());
            while input.parse::<Token![|]>().is_ok() {
                items.push(input.parse::<LitStr>()?.value());
            }
        }
        input.parse::<Token![=>]>()?;
        let target = input.parse::<Path>()?;

        Ok(ChoiceArm { items, target })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(tokens: proc_macro2::TokenStream) -> SelectMacro {
        syn::parse2(tokens).unwrap()
    }

    fn selected(select_macro: &SelectMacro, env: Option<&str>) -> Option<String> {
        select_macro
            .select(env)
            .map(|path| quote!(#path).to_string().replace(' ', ""))
    }

    #[test]
    fn select_arms() {
        let select_macro = parse(quote! {
            "MEMPROBE_PLATFORM_NAME":
                "bsp" | "mvme5500" => bsp::BspPlatform
                _ => generic::GenericPlatform
        });

        assert_eq!(select_macro.env_var, "MEMPROBE_PLATFORM_NAME");
        assert_eq!(
            selected(&select_macro, Some("bsp")).as_deref(),
            Some("bsp::BspPlatform")
        );
        assert_eq!(
            selected(&select_macro, Some("mvme5500")).as_deref(),
            Some("bsp::BspPlatform")
        );
        assert_eq!(
            selected(&select_macro, Some("other")).as_deref(),
            Some("generic::GenericPlatform")
        );
        assert_eq!(
            selected(&select_macro, None).as_deref(),
            Some("generic::GenericPlatform")
        );
    }

    #[test]
    fn no_default_arm() {
        let select_macro = parse(quote! {
            "VAR": "a" => a::A
        });
        assert_eq!(selected(&select_macro, Some("b")), None);
        assert_eq!(selected(&select_macro, None), None);
    }
}
