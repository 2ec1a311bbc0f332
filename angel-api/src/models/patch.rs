//! Shallow-merge rules for profile updates.
//!
//! An update only overwrites a stored value when the incoming value is
//! present *and* truthy: empty strings, zero and `false` count as absent.
//! Lists and nested documents always count as present, even when empty.
//! This means a profile field cannot be cleared to `""` or set to `0`
//! through an update; callers that need that must go through a dedicated
//! operation.

pub trait Truthy {
    fn is_truthy(&self) -> bool;
}

impl Truthy for String {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl Truthy for i32 {
    fn is_truthy(&self) -> bool {
        *self != 0
    }
}

impl Truthy for f64 {
    fn is_truthy(&self) -> bool {
        *self != 0.0 && !self.is_nan()
    }
}

impl Truthy for bool {
    fn is_truthy(&self) -> bool {
        *self
    }
}

impl<T> Truthy for Vec<T> {
    fn is_truthy(&self) -> bool {
        true
    }
}

/// Marks nested documents as always-present for merge purposes.
macro_rules! always_truthy {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::models::patch::Truthy for $ty {
            fn is_truthy(&self) -> bool {
                true
            }
        }
    )+};
}
pub(crate) use always_truthy;

/// Overwrites `target` when `incoming` is truthy. Returns whether it did.
pub fn merge<T: Truthy>(target: &mut T, incoming: Option<T>) -> bool {
    match incoming {
        Some(value) if value.is_truthy() => {
            *target = value;
            true
        }
        _ => false,
    }
}

/// Same as [`merge`] for optional stored fields.
pub fn merge_opt<T: Truthy>(target: &mut Option<T>, incoming: Option<T>) -> bool {
    match incoming {
        Some(value) if value.is_truthy() => {
            *target = Some(value);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falsy_values_leave_target_untouched() {
        let mut name = "Ava".to_string();
        assert!(!merge(&mut name, Some(String::new())));
        assert!(!merge(&mut name, None));
        assert_eq!(name, "Ava");

        let mut age = Some(27);
        assert!(!merge_opt(&mut age, Some(0)));
        assert_eq!(age, Some(27));
    }

    #[test]
    fn truthy_values_overwrite() {
        let mut rate = Some(250.0);
        assert!(merge_opt(&mut rate, Some(300.0)));
        assert_eq!(rate, Some(300.0));
    }

    #[test]
    fn empty_lists_still_overwrite() {
        let mut services = vec!["dinner".to_string()];
        assert!(merge(&mut services, Some(Vec::new())));
        assert!(services.is_empty());
    }
}
