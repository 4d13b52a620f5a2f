//! Callback registries for link notifications

use std::sync::{Arc, Mutex};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A list of callbacks invoked with the same argument
pub struct Caller<T> {
    callbacks: Mutex<Vec<Callback<T>>>,
}

impl<T> Caller<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn add_callback<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(Arc::new(callback));
        }
    }

    /// Invoke every registered callback in registration order. The list is
    /// snapshotted first, so a callback may register further callbacks;
    /// those run from the next call on.
    pub fn call(&self, arg: &T) {
        let callbacks = match self.callbacks.lock() {
            Ok(callbacks) => callbacks.clone(),
            Err(_) => return,
        };
        for callback in callbacks.iter() {
            callback(arg);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Caller<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_callbacks_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let caller: Caller<String> = Caller::new();
        assert!(caller.is_empty());

        for tag in ["a", "b"] {
            let seen = seen.clone();
            caller.add_callback(move |uri: &String| {
                seen.lock().unwrap().push(format!("{}:{}", tag, uri));
            });
        }

        caller.call(&"udp://127.0.0.1:19850".to_string());
        assert_eq!(caller.len(), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["a:udp://127.0.0.1:19850", "b:udp://127.0.0.1:19850"]
        );
    }

    #[test]
    fn test_callback_can_register_callbacks() {
        let caller: Arc<Caller<u32>> = Arc::new(Caller::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let registry = caller.clone();
        let counter = hits.clone();
        caller.add_callback(move |_: &u32| {
            let counter = counter.clone();
            registry.add_callback(move |_: &u32| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        caller.call(&1);
        assert_eq!(caller.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        caller.call(&2);
        assert_eq!(caller.len(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
