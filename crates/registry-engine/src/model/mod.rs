//! Registry data model.
//!
//! Entities reference each other by repo id (or billing/poll id) only; every
//! reference is resolved through the store.

/// Generates `as_str`, `FromStr` and `Display` for a fieldless enum stored as
/// text in the database.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use text_enum;

mod billing;
mod history;
mod poll;
mod registrar;
mod resource;
mod transfer;

pub use billing::*;
pub use history::*;
pub use poll::*;
pub use registrar::*;
pub use resource::*;
pub use transfer::*;

/// Fresh opaque identifier for billing events, poll messages and history
/// entries.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fresh repository id, e.g. `3F2A9C01B7D4-EXAMPLE` for a domain on
/// `.example`.
pub fn new_repo_id(suffix: &str) -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    let suffix = suffix.replace('.', "_").to_uppercase();
    format!("{}-{suffix}", &raw[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_ids_carry_suffix() {
        let id = new_repo_id("co.uk");
        assert!(id.ends_with("-CO_UK"));
        assert_eq!(id.len(), 12 + 1 + 5);
        assert_ne!(new_repo_id("x"), new_repo_id("x"));
    }

    #[test]
    fn text_enums_roundtrip_through_strings() {
        assert_eq!(
            "recurring".parse::<BillingEventKind>(),
            Ok(BillingEventKind::Recurring)
        );
        assert_eq!(ResourceKind::Host.to_string(), "host");
        assert!("bogus".parse::<RegistrarState>().is_err());
    }
}
