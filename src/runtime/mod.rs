//! Runtime support for JIT-compiled programs (spec.md §§3,6-11): the
//! goroutine scheduler, promises, the global timer heap, the main-thread
//! quiescence controller, the process-wide event loop that ties them
//! together, object/class instance storage, heap string and array values,
//! and the `extern "C"` ABI table that JIT-compiled `call` instructions
//! resolve against.

pub mod abi;
pub mod controller;
pub mod event_loop;
pub mod goroutine;
pub mod object;
pub mod promise;
pub mod timers;
pub mod value;

pub use controller::MainController;
pub use event_loop::EventLoop;
pub use goroutine::{GoroutineScheduler, GoroutineTask};
pub use object::{ClassInfo, ObjectId, ObjectRegistry};
pub use promise::Promise;
pub use timers::{TimerId, TimerSystem};
pub use value::ValueHeap;
