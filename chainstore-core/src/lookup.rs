//! Tri-state lookup results.

/// Caller-visible result of a cache read.
///
/// "Not queried yet" and "query in flight" are deliberately folded into
/// [`Lookup::Loading`]: callers only ever need to know whether an answer is
/// available. [`Lookup::Missing`] and [`Lookup::Found`] are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// Not yet available; a fetch may be in flight.
    Loading,
    /// The remote database confirmed the entity does not exist.
    Missing,
    /// The entity's last known value.
    Found(T),
}

impl<T> Lookup<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// True once the answer is terminal (found or missing).
    pub fn is_settled(&self) -> bool {
        !self.is_loading()
    }

    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_found(&self) -> Option<&T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }

    /// `Some(Some(v))` when found, `Some(None)` when missing, `None` while
    /// loading.
    pub fn settled(self) -> Option<Option<T>> {
        match self {
            Self::Loading => None,
            Self::Missing => Some(None),
            Self::Found(value) => Some(Some(value)),
        }
    }

    pub fn map<U, F>(self, f: F) -> Lookup<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Loading => Lookup::Loading,
            Self::Missing => Lookup::Missing,
            Self::Found(value) => Lookup::Found(f(value)),
        }
    }

    /// Chain a dependent lookup onto a found value.
    pub fn and_then<U, F>(self, f: F) -> Lookup<U>
    where
        F: FnOnce(T) -> Lookup<U>,
    {
        match self {
            Self::Loading => Lookup::Loading,
            Self::Missing => Lookup::Missing,
            Self::Found(value) => f(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settled_states() {
        assert!(!Lookup::<i32>::Loading.is_settled());
        assert!(Lookup::<i32>::Missing.is_settled());
        assert!(Lookup::Found(1).is_settled());
    }

    #[test]
    fn test_settled_projection() {
        assert_eq!(Lookup::<i32>::Loading.settled(), None);
        assert_eq!(Lookup::<i32>::Missing.settled(), Some(None));
        assert_eq!(Lookup::Found(7).settled(), Some(Some(7)));
    }

    #[test]
    fn test_map_and_then() {
        assert_eq!(Lookup::Found(2).map(|v| v * 2), Lookup::Found(4));
        assert_eq!(Lookup::Found(2).and_then(|_| Lookup::<u8>::Missing), Lookup::Missing);
        assert_eq!(Lookup::<i32>::Loading.and_then(|v| Lookup::Found(v)), Lookup::Loading);
    }
}
