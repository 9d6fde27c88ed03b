use std::cell::Cell;
use std::rc::Rc;

/// Scope guard for one recursive parser frame. The shared counter is
/// incremented on entry and decremented when the guard drops, on every exit
/// path including `?` propagation.
pub(super) struct DepthGuard {
    depth: Rc<Cell<usize>>,
}

impl DepthGuard {
    /// Enter a frame, or `None` if that would exceed `max`.
    pub(super) fn enter(depth: &Rc<Cell<usize>>, max: usize) -> Option<DepthGuard> {
        let next = depth.get() + 1;
        if next > max {
            return None;
        }
        depth.set(next);
        Some(DepthGuard {
            depth: Rc::clone(depth),
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}
