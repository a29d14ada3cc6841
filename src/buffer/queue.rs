use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::sink::{SinkError, SinkKind};

/// What the queue does after running an operation's `execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The sink started work, or a barrier is waiting for its group. The
    /// operation stays at the head until completion.
    Started,
    /// Nothing was started; shift the operation and run the next one.
    Cycle,
    /// A barrier group completed; each of these queues shifts and continues.
    Unblock(Vec<SinkKind>),
}

/// Sink facts the queue needs from its context.
pub trait SinkState {
    fn has_sink(&self, kind: SinkKind) -> bool;

    fn is_updating(&self, kind: SinkKind) -> bool;
}

type ExecuteFn<C> = Box<dyn FnMut(&mut C) -> Result<Dispatch, SinkError> + Send>;
type CompleteFn<C> = Box<dyn FnMut(&mut C) + Send>;
type ErrorFn<C> = Box<dyn FnMut(&mut C, &SinkError) + Send>;
type UnblockFn<C> = Box<dyn FnOnce(&mut C) + Send>;

/// An append, remove or barrier waiting for its turn on one sink.
pub struct BufferOperation<C> {
    label: &'static str,
    execute: ExecuteFn<C>,
    on_complete: CompleteFn<C>,
    on_error: ErrorFn<C>,
}

impl<C> BufferOperation<C> {
    pub fn new(
        label: &'static str,
        execute: impl FnMut(&mut C) -> Result<Dispatch, SinkError> + Send + 'static,
    ) -> Self {
        Self {
            label,
            execute: Box::new(execute),
            on_complete: Box::new(|_| {}),
            on_error: Box::new(|_, _| {}),
        }
    }

    pub fn with_on_complete(mut self, on_complete: impl FnMut(&mut C) + Send + 'static) -> Self {
        self.on_complete = Box::new(on_complete);
        self
    }

    pub fn with_on_error(mut self, on_error: impl FnMut(&mut C, &SinkError) + Send + 'static) -> Self {
        self.on_error = Box::new(on_error);
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn complete(&mut self, ctx: &mut C) {
        (self.on_complete)(ctx)
    }

    pub fn fail(&mut self, ctx: &mut C, error: &SinkError) {
        (self.on_error)(ctx, error)
    }
}

impl<C> std::fmt::Debug for BufferOperation<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BufferOperation({})", self.label)
    }
}

/// Barriers sharing one callback. The callback runs once every member
/// barrier has reached the head of its queue.
struct BlockerGroup<C> {
    members: Vec<SinkKind>,
    waiting: usize,
    on_unblocked: Option<UnblockFn<C>>,
}

/// Per-sink FIFO of buffer operations with at most one in flight per sink.
///
/// The head of a queue is the running operation. It leaves the queue when
/// the sink reports completion ([`BufferOperationQueue::shift_and_execute_next`]),
/// never from an error handler.
pub struct BufferOperationQueue<C> {
    queues: BTreeMap<SinkKind, VecDeque<BufferOperation<C>>>,
}

impl<C> Default for BufferOperationQueue<C> {
    fn default() -> Self {
        Self { queues: BTreeMap::new() }
    }
}

impl<C: SinkState + 'static> BufferOperationQueue<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `operation`, running it right away when the sink is idle.
    pub fn append(&mut self, operation: BufferOperation<C>, kind: SinkKind, ctx: &mut C) {
        let queue = self.queues.entry(kind).or_default();
        queue.push_back(operation);
        if queue.len() == 1 && ctx.has_sink(kind) {
            self.execute_next(kind, ctx);
        }
    }

    /// Queues a barrier on every sink in `kinds`; `on_unblocked` runs once
    /// all of them are at the head, after which the queues continue.
    pub fn append_blockers(
        &mut self,
        kinds: &[SinkKind],
        on_unblocked: impl FnOnce(&mut C) + Send + 'static,
        ctx: &mut C,
    ) {
        if kinds.is_empty() {
            on_unblocked(ctx);
            return;
        }

        let group = Arc::new(Mutex::new(BlockerGroup {
            members: kinds.to_vec(),
            waiting: kinds.len(),
            on_unblocked: Some(Box::new(on_unblocked) as UnblockFn<C>),
        }));
        for &kind in kinds {
            let group = Arc::clone(&group);
            let blocker = BufferOperation::new("blocker", move |ctx: &mut C| {
                let released = {
                    let mut group = group.lock();
                    group.waiting = group.waiting.saturating_sub(1);
                    if group.waiting > 0 {
                        None
                    } else {
                        Some((group.on_unblocked.take(), group.members.clone()))
                    }
                };
                match released {
                    None => Ok(Dispatch::Started),
                    Some((on_unblocked, members)) => {
                        if let Some(on_unblocked) = on_unblocked {
                            on_unblocked(ctx);
                        }
                        Ok(Dispatch::Unblock(members))
                    }
                }
            });
            self.append(blocker, kind, ctx);
        }
    }

    /// Runs the head operation of `kind`.
    pub fn execute_next(&mut self, kind: SinkKind, ctx: &mut C) {
        let Some(operation) = self.queues.get_mut(&kind).and_then(VecDeque::front_mut) else {
            return;
        };

        match (operation.execute)(ctx) {
            Ok(Dispatch::Started) => {}
            Ok(Dispatch::Cycle) => self.shift_and_execute_next(kind, ctx),
            Ok(Dispatch::Unblock(kinds)) => {
                for kind in kinds {
                    self.shift_and_execute_next(kind, ctx);
                }
            }
            Err(e) => {
                log::warn!(
                    "[buffer-operation-queue] {} operation on {} sink failed to start: {}",
                    operation.label,
                    kind,
                    e
                );
                operation.fail(ctx, &e);
                // an updating sink still reports completion, which shifts
                if !ctx.is_updating(kind) {
                    self.shift_and_execute_next(kind, ctx);
                }
            }
        }
    }

    /// Drops the head of `kind` and runs the next operation.
    pub fn shift_and_execute_next(&mut self, kind: SinkKind, ctx: &mut C) {
        if let Some(queue) = self.queues.get_mut(&kind) {
            queue.pop_front();
        }
        self.execute_next(kind, ctx);
    }

    pub fn current(&self, kind: SinkKind) -> Option<&BufferOperation<C>> {
        self.queues.get(&kind).and_then(VecDeque::front)
    }

    pub fn current_mut(&mut self, kind: SinkKind) -> Option<&mut BufferOperation<C>> {
        self.queues.get_mut(&kind).and_then(VecDeque::front_mut)
    }

    pub fn len(&self, kind: SinkKind) -> usize {
        self.queues.get(&kind).map_or(0, VecDeque::len)
    }
}
