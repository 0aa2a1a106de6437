//! Core types and logic for droid-remote.
//!
//! This crate turns uiautomator dumps of the itsme app into typed screens and
//! drives pending actions to confirmation. It never talks to adb itself; the
//! CLI supplies a [`device::Device`] implementation.
//!
//! # Modules
//!
//! - [`tree`]: UI hierarchy snapshots
//! - [`geometry`]: points and bounds in device pixels
//! - [`device`]: the seam to the phone
//! - [`itsme`]: screen classifiers, pinpad geometry and the confirmation flow
//! - [`error`]: operator-facing error types with suggestions
//! - [`protocol`]: JSON-line request/response protocol
//!
//! # Screens
//!
//! | Screen | Marker | Action |
//! |--------|--------|--------|
//! | Home, nothing pending | "No pending actions" | none |
//! | Home, pending | "Tap the card to open" | tap card |
//! | Action | "Shared ID data" | confirm / reject |
//! | Poka yoke | "Check and tap the icon to continue." | tap image |
//! | Pinpad | "Confirm with your itsme code" | enter PIN |
//! | Action expired | "Action has expired" + "OK" | ok |
//! | Play rating | review disclaimer + "Not now" | not now |
//! | Action confirmed | no text, one small icon | none |

pub mod device;
pub mod error;
pub mod geometry;
pub mod itsme;
pub mod protocol;
pub mod tree;
