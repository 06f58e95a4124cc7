//! Variable schemas. A `Vars` lists the column names of a batch, in order.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Ordered, duplicate-free set of variable names.
///
/// Cloning is cheap: names are shared `Arc<str>`s.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Vars {
    names: Vec<Arc<str>>,
}

impl Vars {
    /// Build from names, silently dropping duplicates (first occurrence wins).
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Vars::default();
        for n in names {
            out.push(n.as_ref());
        }
        out
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Append `name` unless already present. Returns whether it was added.
    pub fn push(&mut self, name: &str) -> bool {
        let name = name.strip_prefix('?').unwrap_or(name);
        if self.contains(name) {
            return false;
        }
        self.names.push(Arc::from(name));
        true
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Column index of `name`. A leading `?` is ignored.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let name = name.strip_prefix('?').unwrap_or(name);
        self.names.iter().position(|n| &**n == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.names.get(idx).map(|n| &**n)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.names.iter().map(|n| &**n)
    }

    /// `self` followed by the vars of `other` that `self` lacks.
    pub fn union(&self, other: &Vars) -> Vars {
        let mut out = self.clone();
        for n in other.iter() {
            out.push(n);
        }
        out
    }

    /// Vars of `self` not present in `other`.
    pub fn minus(&self, other: &Vars) -> Vars {
        Vars::new(self.iter().filter(|n| !other.contains(n)))
    }

    /// Vars present in both, in `self` order.
    pub fn intersection(&self, other: &Vars) -> Vars {
        Vars::new(self.iter().filter(|n| other.contains(n)))
    }

    pub fn intersects(&self, other: &Vars) -> bool {
        self.iter().any(|n| other.contains(n))
    }
}

impl fmt::Display for Vars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, n) in self.names.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "?{n}")?;
        }
        f.write_str("]")
    }
}

impl<S: AsRef<str>> FromIterator<S> for Vars {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Vars::new(iter)
    }
}
