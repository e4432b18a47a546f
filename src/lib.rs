//! A "now playing" feed for one Spotify account.
//!
//! `spinfeed` polls the upstream player state, keeps the last known track
//! in a snapshot, and streams that snapshot to any number of browsers as
//! server-sent events. The poll period adapts to the audience: short while
//! somebody is watching, long while nobody is.
//!
//! # Architecture
//!
//! * [`guard`] - sole owner of the OAuth token, serializes upstream calls
//! * [`registry`] - connected stream subscribers
//! * [`scheduler`] - the adaptive poll timer
//! * [`snapshot`] - the published snapshot and its merge rules
//! * [`broadcast`] - the event stream wire format
//! * [`feed`] - ties the above together for one process
//! * [`server`] - the HTTP routes
//!
//! Supporting modules: [`auth`] (login and token refresh), [`credentials`]
//! (token persistence), [`upstream`] and [`protocol`] (the Web API),
//! [`http`], [`config`], [`events`], [`signal`] and [`error`].
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod feed;
pub mod guard;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod signal;
pub mod snapshot;
pub mod token;
pub mod upstream;
