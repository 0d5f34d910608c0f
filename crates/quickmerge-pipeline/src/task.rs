use crate::handle::PipelineHandle;

/// Where a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// On the pipeline's single foreground thread, which owns interaction state.
    Foreground,
    /// On the blocking worker pool; the pipeline waits for completion.
    Background,
}

type Action<C, E> = Box<dyn FnOnce(&mut C, &mut StepControl<C, E>) -> Result<(), E> + Send>;

/// One named unit of work. Consumed when it runs.
pub struct Task<C, E> {
    name: String,
    affinity: Affinity,
    action: Action<C, E>,
}

impl<C, E> Task<C, E> {
    pub fn new<F>(name: impl Into<String>, affinity: Affinity, action: F) -> Self
    where
        F: FnOnce(&mut C, &mut StepControl<C, E>) -> Result<(), E> + Send + 'static,
    {
        Self {
            name: name.into(),
            affinity,
            action: Box::new(action),
        }
    }

    pub fn foreground<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce(&mut C, &mut StepControl<C, E>) -> Result<(), E> + Send + 'static,
    {
        Self::new(name, Affinity::Foreground, action)
    }

    pub fn background<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce(&mut C, &mut StepControl<C, E>) -> Result<(), E> + Send + 'static,
    {
        Self::new(name, Affinity::Background, action)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    pub(crate) fn into_parts(self) -> (String, Affinity, Action<C, E>) {
        (self.name, self.affinity, self.action)
    }
}

impl<C, E> std::fmt::Debug for Task<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("affinity", &self.affinity)
            .finish_non_exhaustive()
    }
}

/// Directives a running task gives back to the pipeline.
pub struct StepControl<C, E> {
    inserted: Vec<Task<C, E>>,
    suspended: bool,
    cancelled: bool,
    handle: PipelineHandle,
}

impl<C, E> StepControl<C, E> {
    pub(crate) fn new(handle: PipelineHandle) -> Self {
        Self {
            inserted: Vec::new(),
            suspended: false,
            cancelled: false,
            handle,
        }
    }

    /// Queue `tasks` right after the current one, in the given order.
    pub fn next(&mut self, tasks: impl IntoIterator<Item = Task<C, E>>) {
        self.inserted.extend(tasks);
    }

    /// Pause after this task returns until [`PipelineHandle::ping`].
    ///
    /// Takes effect immediately, so a ping issued before the task returns is
    /// not lost.
    pub fn suspend(&mut self) {
        self.suspended = true;
        self.handle.suspend();
    }

    /// Discard the remaining queue, including tasks inserted by this step.
    pub fn cancel_everything(&mut self) {
        self.cancelled = true;
        self.handle.cancel();
    }

    /// Cooperative cancellation probe for long-running actions.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled || self.handle.is_cancelled()
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub(crate) fn take_inserted(&mut self) -> Vec<Task<C, E>> {
        std::mem::take(&mut self.inserted)
    }
}
