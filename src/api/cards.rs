//! Fixed cards and the demo contact the dashboard buttons insert.

use crate::config::Config;
use crate::mirror::{Contact, MenuItem, MenuValue, TimelineItem};

pub const DEMO_CONTACT_ID: &str = "rust-quick-start";
pub const DEMO_CONTACT_NAME: &str = "Rust Quick Start";

pub fn demo_contact(config: &Config) -> Contact {
    Contact {
        id: DEMO_CONTACT_ID.into(),
        display_name: DEMO_CONTACT_NAME.into(),
        image_urls: vec![config.static_url("images/chipotle-tube-640x360.jpg")],
    }
}

pub fn welcome_item() -> TimelineItem {
    TimelineItem::with_text("Welcome to the Rust Quick Start").notify()
}

pub fn broadcast_item() -> TimelineItem {
    TimelineItem::with_text("Hello Everyone!").notify()
}

/// Card offering the built-in actions plus a custom "drill" action.
pub fn item_with_actions(config: &Config) -> TimelineItem {
    TimelineItem {
        speakable_text: Some("What did you eat? Bacon?".into()),
        menu_items: vec![
            MenuItem::builtin("REPLY"),
            MenuItem::builtin("SHARE"),
            MenuItem::builtin("READ_ALOUD"),
            MenuItem {
                action: "CUSTOM".into(),
                id: Some("drill".into()),
                values: vec![MenuValue {
                    display_name: "Drill Into".into(),
                    icon_url: Some(config.static_url("images/drill.png")),
                }],
            },
        ],
        ..TimelineItem::with_text("Tell me what you had for lunch :)")
    }
    .notify()
}

const PRETTY_IMAGE: &str = "images/saturn-eclipse.jpg";

fn image_fragment(src: &str) -> String {
    format!(r#"<img src="{src}" width="100%" height="100%"><div class="photo-overlay"></div>"#)
}

fn text_fragment(headline: &str, detail: &str) -> String {
    format!(
        r#"<section><p class="text-auto-size">{headline} <span class="yellow">{detail}</span></p></section>"#
    )
}

/// HTML card assembled from the photo and caption fragments.
pub fn pretty_item(config: &Config) -> TimelineItem {
    let html = format!(
        r#"<article class="photo">{}{}</article>"#,
        image_fragment(&config.static_url(PRETTY_IMAGE)),
        text_fragment("Rust Quick Start", "rendered with HTML")
    );

    TimelineItem {
        html: Some(html),
        speakable_text: Some("Rust Quick Start, rendered with HTML".into()),
        ..Default::default()
    }
    .notify()
}
