use std::cell::Cell;
use std::rc::Rc;

use super::*;

/// Rate-limiting wrapper: of any burst of calls, only the newest one runs,
/// `wait_ms` after it was made on the page's virtual clock.
pub fn debounce<A, F>(callback: F, wait_ms: i64) -> Debounced<A>
where
    A: Clone + 'static,
    F: Fn(&mut Page, &A) -> Result<()> + 'static,
{
    Debounced {
        callback: Rc::new(callback),
        wait_ms,
        pending: Rc::new(Cell::new(None)),
    }
}

pub struct Debounced<A: Clone + 'static> {
    callback: Rc<dyn Fn(&mut Page, &A) -> Result<()>>,
    wait_ms: i64,
    pending: Rc<Cell<Option<i64>>>,
}

impl<A: Clone + 'static> Debounced<A> {
    pub fn call(&self, page: &mut Page, args: A) -> Result<()> {
        if let Some(timer_id) = self.pending.take() {
            page.clear_timer(timer_id);
        }

        let callback = self.callback.clone();
        let pending = self.pending.clone();
        let timer_id = page.schedule_timeout(self.wait_ms, move |page| {
            pending.set(None);
            callback(page, &args)
        })?;
        self.pending.set(Some(timer_id));
        Ok(())
    }

    pub fn pending_timer(&self) -> Option<i64> {
        self.pending.get()
    }

    pub fn wait_ms(&self) -> i64 {
        self.wait_ms
    }
}

impl<A: Clone + 'static> Clone for Debounced<A> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
            wait_ms: self.wait_ms,
            pending: self.pending.clone(),
        }
    }
}
