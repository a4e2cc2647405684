//! Module scopes and call scopes: the ownership anchors that make plugin
//! shutdown reclaim everything the plugin created. Every scope is a
//! [`RootId`] in the handle table; `ModuleScope` lives as long as the
//! plugin is loaded, and `CallScope`s stack per-thread with strict LIFO
//! discipline.

use std::sync::Arc;

use crate::handle::{Handle, HandleTable, RootId};

/// A plugin's handles live under this scope for the plugin's whole
/// lifetime. Dropping (or explicitly releasing) it reclaims every handle
/// the plugin ever created and did not explicitly hand off elsewhere.
pub struct ModuleScope {
    table: Arc<HandleTable>,
    root: RootId,
}

impl ModuleScope {
    pub(crate) fn new(table: Arc<HandleTable>) -> Self {
        let root = table.create_root();
        Self { table, root }
    }

    pub fn root(&self) -> RootId {
        self.root
    }

    pub fn create<T: std::any::Any + Send + Sync>(
        &self,
        object: T,
    ) -> Result<Handle, crate::error::CoreError> {
        self.table.create(self.root, object)
    }

    pub fn release(&self, handle: Handle) {
        self.table.release(self.root, handle);
    }
}

impl Drop for ModuleScope {
    fn drop(&mut self) {
        self.table.release_root(self.root);
    }
}

/// One stack frame of handle ownership, scoped to a single call into or out
/// of a plugin. Handles created while this frame is the innermost one on
/// its thread are anchored here and reclaimed the moment it pops, even if
/// the plugin callback forgot to release them.
pub struct CallScope {
    table: Arc<HandleTable>,
    root: RootId,
}

impl CallScope {
    fn new(table: Arc<HandleTable>) -> Self {
        let root = table.create_root();
        Self { table, root }
    }

    pub fn root(&self) -> RootId {
        self.root
    }

    pub fn create<T: std::any::Any + Send + Sync>(
        &self,
        object: T,
    ) -> Result<Handle, crate::error::CoreError> {
        self.table.create(self.root, object)
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        self.table.release_root(self.root);
    }
}

/// Per-thread execution state: the module scope currently in effect, the
/// stack-disciplined call-scope stack, and the handle of the task (if any)
/// this thread is currently running.
pub struct ThreadContext {
    table: Arc<HandleTable>,
    module_scope: std::cell::RefCell<Option<Arc<ModuleScope>>>,
    call_stack: std::cell::RefCell<Vec<Arc<CallScope>>>,
    active_task: std::cell::Cell<Option<Handle>>,
}

impl ThreadContext {
    fn new(table: Arc<HandleTable>) -> Self {
        Self {
            table,
            module_scope: std::cell::RefCell::new(None),
            call_stack: std::cell::RefCell::new(Vec::new()),
            active_task: std::cell::Cell::new(None),
        }
    }

    pub fn set_module_scope(&self, scope: Option<Arc<ModuleScope>>) {
        *self.module_scope.borrow_mut() = scope;
    }

    pub fn module_scope(&self) -> Option<Arc<ModuleScope>> {
        self.module_scope.borrow().clone()
    }

    /// Pushes a new call scope (a "temp root") and returns a guard that
    /// pops it on drop. Handles created while this guard is alive and this
    /// is the innermost scope are anchored here.
    pub fn push_call_scope(&self) -> CallScopeGuard<'_> {
        let scope = Arc::new(CallScope::new(Arc::clone(&self.table)));
        self.call_stack.borrow_mut().push(Arc::clone(&scope));
        CallScopeGuard { ctx: self, scope }
    }

    pub fn innermost_call_scope(&self) -> Option<Arc<CallScope>> {
        self.call_stack.borrow().last().cloned()
    }

    pub fn set_active_task(&self, task: Option<Handle>) {
        self.active_task.set(task);
    }

    pub fn active_task(&self) -> Option<Handle> {
        self.active_task.get()
    }
}

/// Guard returned by [`ThreadContext::push_call_scope`]; pops the scope
/// (and releases every handle it anchored) when dropped.
pub struct CallScopeGuard<'a> {
    ctx: &'a ThreadContext,
    scope: Arc<CallScope>,
}

impl<'a> CallScopeGuard<'a> {
    pub fn scope(&self) -> &Arc<CallScope> {
        &self.scope
    }
}

impl<'a> Drop for CallScopeGuard<'a> {
    fn drop(&mut self) {
        let mut stack = self.ctx.call_stack.borrow_mut();
        if let Some(pos) = stack.iter().position(|s| Arc::ptr_eq(s, &self.scope)) {
            stack.remove(pos);
        }
    }
}

thread_local! {
    static CURRENT: std::cell::RefCell<Option<Arc<ThreadContext>>> = std::cell::RefCell::new(None);
}

/// Returns (creating if necessary) this thread's [`ThreadContext`], bound
/// to `table`. Every thread that calls into the core for the first time
/// gets its own context lazily.
pub fn thread_context(table: &Arc<HandleTable>) -> Arc<ThreadContext> {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(Arc::new(ThreadContext::new(Arc::clone(table))));
        }
        Arc::clone(slot.as_ref().unwrap())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_scope_drop_releases_its_handles() {
        let table = Arc::new(HandleTable::new());
        let handle = {
            let scope = ModuleScope::new(Arc::clone(&table));
            scope.create(42i32).unwrap()
        };
        assert!(table.lookup::<i32>(handle).is_none());
    }

    #[test]
    fn call_scope_stack_is_lifo() {
        let table = Arc::new(HandleTable::new());
        let ctx = thread_context(&table);
        let outer = ctx.push_call_scope();
        let h_outer = outer.scope().create(1i32).unwrap();
        {
            let inner = ctx.push_call_scope();
            let h_inner = inner.scope().create(2i32).unwrap();
            assert!(table.lookup::<i32>(h_inner).is_some());
        }
        // inner popped: its handle is gone, outer's is still alive
        assert!(table.lookup::<i32>(h_outer).is_some());
        drop(outer);
        assert!(table.lookup::<i32>(h_outer).is_none());
    }
}
