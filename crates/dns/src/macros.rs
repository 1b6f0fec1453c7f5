/// Declares a `u16`-backed wire enum that keeps unrecognised values as `Unknown(u16)`.
///
/// Besides the numeric conversions, the generated type can be parsed from and
/// rendered to its presentation-format mnemonic (`A`, `IN`, ...), with the
/// RFC 3597 `TYPEnnn` / `CLASSnnn` fallback spelled by `$unknown_prefix`.
#[macro_export]
macro_rules! u16_enum_with_unknown {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident ($unknown_prefix:literal) {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $value:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )*
            Unknown(u16),
        }

        impl $name {
            pub const fn to_u16(self) -> u16 {
                match self {
                    $(Self::$variant => $value,)*
                    Self::Unknown(v) => v,
                }
            }

            /// Presentation-format mnemonic.
            pub fn mnemonic(self) -> ::std::borrow::Cow<'static, str> {
                match self {
                    $(Self::$variant => ::std::borrow::Cow::Borrowed(stringify!($variant)),)*
                    Self::Unknown(v) => ::std::borrow::Cow::Owned(format!("{}{}", $unknown_prefix, v)),
                }
            }

            /// Parse a mnemonic, case-insensitively. Accepts the generic numeric form too.
            pub fn from_mnemonic(s: &str) -> Option<Self> {
                $(
                    if s.eq_ignore_ascii_case(stringify!($variant)) {
                        return Some(Self::$variant);
                    }
                )*
                let prefix_len = $unknown_prefix.len();
                match (s.get(..prefix_len), s.get(prefix_len..)) {
                    (Some(prefix), Some(num)) if prefix.eq_ignore_ascii_case($unknown_prefix) => {
                        num.parse::<u16>().ok().map(Self::from)
                    }
                    _ => None,
                }
            }
        }

        impl From<u16> for $name {
            fn from(v: u16) -> Self {
                match v {
                    $($value => Self::$variant,)*
                    other => Self::Unknown(other),
                }
            }
        }

        impl From<$name> for u16 {
            fn from(v: $name) -> u16 {
                v.to_u16()
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(&self.mnemonic())
            }
        }
    };
}
