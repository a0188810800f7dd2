//! Multi-step actions.
//!
//! An action kind's `call` operation runs a sequence of awaited requests.
//! The body describes the sequence as a [`Step`] machine: each
//! [`Step::Await`] performs one request on another node and hands the
//! result to a continuation that returns the next step.
//!
//! When an awaited request is `pending`, the machine parks on that step and
//! the call itself answers `pending`. Calling again (typically because a
//! subscription saw the awaited node change) resumes from the parked step;
//! steps that already completed are never performed again. An `error`
//! aborts the machine and becomes the call's result; the next call starts
//! over.
//!
//! ```rust,ignore
//! let checkout = ActionKind::define("checkout", Shape::empty().required("cart", FieldType::Node), |node| {
//!     let cart = node.node("cart").cloned().unwrap_or_else(sentinel::nil);
//!     Step::perform(cart, Request::call(), |receipt| Step::Done(receipt))
//! });
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::kind::{NodeKind, Operation, OperationName, Outcome, Request, RunError};
use crate::node::{sentinel, FieldType, NodeDefinition, Shape, Value};
use crate::props;

const MACHINE: &str = "action.machine";
const RESULT: &str = "action.result";

pub const STATUS_IDLE: &str = "idle";
pub const STATUS_WAITING: &str = "waiting";
pub const STATUS_DONE: &str = "done";
pub const STATUS_FAILED: &str = "failed";

type Continuation = Box<dyn FnOnce(NodeDefinition) -> Step + Send>;

/// One state of an action's machine.
pub enum Step {
    /// Perform `request` on `target` (bound next to the action node) and
    /// continue with its result.
    Await {
        target: NodeDefinition,
        request: Request,
        then: Continuation,
    },
    /// Finish with this result.
    Done(NodeDefinition),
}

impl Step {
    pub fn perform<F>(target: NodeDefinition, request: Request, then: F) -> Self
    where
        F: FnOnce(NodeDefinition) -> Step + Send + 'static,
    {
        Step::Await {
            target,
            request,
            then: Box::new(then),
        }
    }

    pub fn evaluate<F>(target: NodeDefinition, then: F) -> Self
    where
        F: FnOnce(NodeDefinition) -> Step + Send + 'static,
    {
        Self::perform(target, Request::evaluate(), then)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Await { target, request, .. } => f
                .debug_struct("Await")
                .field("target", target.id())
                .field("operation", &request.operation())
                .finish(),
            Step::Done(value) => f.debug_tuple("Done").field(value.id()).finish(),
        }
    }
}

/// The parked step of a running action, kept in the node's ephemeral data.
#[derive(Clone)]
struct Machine(Arc<Mutex<Option<Step>>>);

impl Machine {
    fn start(step: Step) -> Self {
        Self(Arc::new(Mutex::new(Some(step))))
    }

    fn take(&self) -> Option<Step> {
        self.0.lock().take()
    }

    fn park(&self, step: Step) {
        *self.0.lock() = Some(step);
    }
}

type BodyFn = Arc<dyn Fn(&NodeDefinition) -> Step + Send + Sync>;

/// Builder for action kinds.
pub struct ActionKind;

impl ActionKind {
    /// Define and register an action kind named `name`.
    pub fn define<F>(name: &str, shape: Shape, body: F) -> NodeKind
    where
        F: Fn(&NodeDefinition) -> Step + Send + Sync + 'static,
    {
        let body: BodyFn = Arc::new(body);
        NodeKind::builder(name)
            .shape(shape)
            .state(|_| initial_state())
            .state_shape(
                Shape::empty()
                    .required("step", FieldType::Int)
                    .required("status", FieldType::String),
            )
            .operation(OperationName::Call, Operation::new(move |args| call(args, &body)).uncached())
            .operation(
                OperationName::Reset,
                Operation::new(|args| {
                    drop(args.take_data::<Machine>(MACHINE));
                    drop(args.take_data::<NodeDefinition>(RESULT));
                    args.set_state(|_| initial_state());
                    Ok(sentinel::ok().into())
                }),
            )
            .define()
    }
}

fn initial_state() -> Value {
    Value::Map(props! { "step" => 0, "status" => STATUS_IDLE })
}

fn call(args: &crate::reactive::RunArgs<'_>, body: &BodyFn) -> Result<Outcome, RunError> {
    if let Some(result) = args.get_data::<NodeDefinition>(RESULT) {
        return Ok(result.into());
    }
    let machine = match args.get_data::<Machine>(MACHINE) {
        Some(machine) => machine,
        None => {
            let machine = Machine::start(body(args.definition()));
            args.set_data(MACHINE, machine.clone());
            machine
        }
    };

    loop {
        let Some(step) = machine.take() else {
            return Err(RunError::message("Action is already running"));
        };
        match step {
            Step::Done(value) => {
                tracing::debug!(action = %args.definition().id(), result = %value.id(), "action completed");
                args.set_data(RESULT, value.clone());
                drop(args.take_data::<Machine>(MACHINE));
                args.merge_state(props! { "status" => STATUS_DONE });
                return Ok(value.into());
            }
            Step::Await { target, request, then } => {
                let result = args.perform(target.clone(), request.clone());
                if sentinel::is_pending(&result) {
                    machine.park(Step::Await { target, request, then });
                    args.merge_state(props! { "status" => STATUS_WAITING });
                    return Ok(result.into());
                }
                if sentinel::is_error(&result) {
                    tracing::debug!(action = %args.definition().id(), "action aborted");
                    drop(args.take_data::<Machine>(MACHINE));
                    args.merge_state(props! { "status" => STATUS_FAILED });
                    return Err(RunError::Sentinel(result));
                }
                machine.park(then(result));
                args.set_state(|state| {
                    let mut next = state.as_map().cloned().unwrap_or_default();
                    let step = next.get("step").and_then(Value::as_i64).unwrap_or(0);
                    next.insert("step".to_string(), Value::Int(step + 1));
                    Value::Map(next)
                });
            }
        }
    }
}
