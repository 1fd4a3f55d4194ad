//! Builtin scheduling plugins
//!
//! Each module exports `PLUGIN_NAME` and a `new` builder; the registry
//! wires them up once at startup.

pub mod binpack;
pub mod conformance;
pub mod drf;
pub mod dynamicresources;
pub mod gang;
pub mod networktopologyaware;
pub mod nodeorder;
pub mod predicates;
pub mod priority;
pub mod proportion;
pub mod rescheduling;
