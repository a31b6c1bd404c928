//! Internal disposal bag for managing cleanup hooks.

/// Teardown callbacks executed in LIFO order.
///
/// Lives on the thread that owns it; callbacks may capture `Rc` state.
#[derive(Default)]
pub(crate) struct DisposeBag {
    hooks: Vec<Box<dyn FnOnce()>>,
}

impl DisposeBag {
    pub(crate) fn push(&mut self, f: Box<dyn FnOnce()>) {
        self.hooks.push(f);
    }

    /// Runs every hook in reverse registration order, leaving the bag empty.
    ///
    /// A panicking hook does not stop the remaining ones; the first panic is
    /// reported back as its message.
    pub(crate) fn run_all_reverse(&mut self) -> Option<String> {
        let mut first_panic = None;
        while let Some(f) = self.hooks.pop() {
            if let Err(message) = super::catch_panic(f) {
                first_panic.get_or_insert(message);
            }
        }
        first_panic
    }

    pub(crate) fn len(&self) -> usize {
        self.hooks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn runs_lifo_and_survives_panics() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut bag = DisposeBag::default();
        for i in 0..3 {
            let order = order.clone();
            bag.push(Box::new(move || order.borrow_mut().push(i)));
        }
        bag.push(Box::new(|| panic!("teardown failed")));

        let panic = bag.run_all_reverse();
        assert_eq!(panic.as_deref(), Some("teardown failed"));
        assert_eq!(*order.borrow(), vec![2, 1, 0]);
        assert_eq!(bag.len(), 0);
        assert_eq!(bag.run_all_reverse(), None);
    }
}
