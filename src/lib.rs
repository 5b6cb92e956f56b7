//! Autopilot phase-transition scheduler: schedules and fires the
//! Registration/Submission/Review END deadlines for a challenge platform,
//! reacts to challenge updates, and reconciles against the phase catalog
//! on startup.

pub mod domain;
pub mod infrastructure;
pub mod services;
