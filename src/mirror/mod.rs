//! Mirror API facade.
//!
//! [`MirrorApi`] is the typed surface the routes call; [`MirrorClient`] implements
//! it over HTTP for one access token, and a [`MirrorConnector`] hands out a fresh
//! client per request.

mod client;
pub mod types;

pub use client::{HttpMirrorConnector, MirrorApi, MirrorClient, MirrorConnector, MirrorError};
pub use types::{
    Attachment, Contact, Downloaded, ListTimeline, Location, MediaUpload, MenuItem, MenuValue,
    Notification, NotificationConfig, Subscription, TimelineItem, UserAction,
};
