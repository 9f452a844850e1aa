//! # Assets - Shared Per-Structure State
//!
//! Each structure carries a typed-any namespace its members may share:
//! chunk databases, rule stores, learned weight dictionaries. Handles
//! are cheap clones of one shared map. There is no locking; cycles are
//! single-threaded and the convention is one writing member per asset.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A shared namespace of named, typed values.
#[derive(Clone, Default)]
pub struct Assets {
    inner: Rc<RefCell<HashMap<String, Rc<dyn Any>>>>,
}

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `name`, replacing any previous value.
    pub fn insert<T: 'static>(&self, name: &str, value: T) {
        self.inner
            .borrow_mut()
            .insert(name.to_string(), Rc::new(value));
    }

    /// Fetch the asset under `name`, if present with type `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Rc<T>> {
        let value = self.inner.borrow().get(name).cloned()?;
        value.downcast().ok()
    }

    pub fn remove(&self, name: &str) -> bool {
        self.inner.borrow_mut().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

impl std::fmt::Debug for Assets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.inner.borrow().keys().cloned().collect();
        f.debug_tuple("Assets").field(&names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_handles_share_one_map() {
        let a = Assets::new();
        let b = a.clone();
        a.insert("threshold", 0.5f64);
        assert_eq!(b.get::<f64>("threshold").as_deref(), Some(&0.5));
        assert!(b.get::<i32>("threshold").is_none());
    }

    #[test]
    fn test_interior_mutability_through_refcell_assets() {
        let a = Assets::new();
        a.insert("store", RefCell::new(vec![1, 2]));
        if let Some(store) = a.get::<RefCell<Vec<i32>>>("store") {
            store.borrow_mut().push(3);
        }
        let store = a.get::<RefCell<Vec<i32>>>("store").unwrap();
        assert_eq!(*store.borrow(), vec![1, 2, 3]);
    }
}
