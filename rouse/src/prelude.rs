//! One-stop imports for typical rouse programs.
//!
//! ```
//! use rouse::prelude::*;
//!
//! let runtime = Runtime::new();
//! let condition = runtime.reactor().new_condition();
//! condition.rouse(vec![Value::Number(7.0)]).unwrap();
//! let values = runtime.block_on(condition.await_signal()).unwrap();
//! assert_eq!(values[0], Value::Number(7.0));
//! ```

pub use crate::error::{RouseError, RouseResult};
pub use crate::pipe::PipeRef;
pub use crate::process::{spawn, ProcessOptions, ProcessOutcome, ProcessRef, StdioBinding};
pub use crate::reactor::{ActorRef, Reactor};
pub use crate::runtime::{Runtime, Spawner};
pub use crate::timer::{sleep, timeout};
pub use crate::transfer::{Function, Table, Value};
