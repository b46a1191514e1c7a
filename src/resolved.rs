/// A value that was either produced normally or substituted after a failure.
///
/// Lookups and formatting in the forwarding pipeline never fail outright;
/// they degrade. Keeping the distinction in the type lets callers log it and
/// lets tests tell "succeeded" from "degraded".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved<T> {
    Found(T),
    Fallback(T),
}

impl<T> Resolved<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolved::Fallback(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Resolved::Found(v) | Resolved::Fallback(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Resolved::Found(v) | Resolved::Fallback(v) => v,
        }
    }
}
