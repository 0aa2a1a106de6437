//! The itsme screen driver.
//!
//! - [`screen`]: what each known screen looks like once classified, and the
//!   taps it offers
//! - [`parse`]: classifiers and the dispatcher
//! - [`pinpad`]: PIN pad geometry
//! - [`confirm`]: the confirmation flow
//! - [`interactive`]: operator-driven screen handling

pub mod confirm;
pub mod interactive;
pub mod parse;
pub mod pinpad;
pub mod screen;

#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod fixtures;

pub use parse::ITSME_PACKAGE;
