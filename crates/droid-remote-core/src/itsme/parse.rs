//! Screen classifiers.
//!
//! Each classifier is a pure function over a [`UiTree`]. It looks for text
//! markers unique to one screen and either returns the populated [`Screen`]
//! or a [`WrongScreen`] explaining what did not match. A marker that appears
//! more than once is treated the same as a missing one: ambiguity is never
//! resolved silently.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::device::{Device, DeviceError};
use crate::geometry::Bounds;
use crate::itsme::pinpad::locate_pad;
use crate::itsme::screen::{
    ActionBasicInfo, ActionExpiredScreen, ActionScreen, PendingActionsHome, PinpadScreen,
    PlayRatingScreen, PokaYokeImage, PokaYokeScreen, Screen,
};
use crate::tree::{UiNode, UiTree, NODE_TAG};

/// Package name of the itsme app.
pub const ITSME_PACKAGE: &str = "be.bmid.itsme";

const NO_PENDING_ACTIONS: &str = "No pending actions";
const TAP_THE_CARD: &str = "Tap the card to open";
const ACTION_COUNT_ID: &str = "action_count_tag";
const SHARED_ID_DATA: &str = "Shared ID data";
const INFO_HEADER: &str = "Info";
const DETAILS_HEADER: &str = "Details";
const BUTTON_CLASS: &str = "android.widget.Button";
const CONFIRM_LABEL: &str = "Confirm";
const REJECT_LABEL: &str = "Reject";
const POKA_YOKE_PROMPT: &str = "Check and tap the icon to continue.";
const PIN_PROMPT: &str = "Confirm with your itsme code";
const POKA_YOKE_IMAGE_PREFIX: &str = "image_";
const PINPAD_ID: &str = "pinpad";
const ACTION_EXPIRED: &str = "Action has expired";
const OK_LABEL: &str = "OK";
const PLAY_RATING_DISCLAIMER: &str =
    "Reviews are public and include your account and device info.";
const NOT_NOW_LABEL: &str = "Not now";

/// The confirmation screen is a lone check mark: its smallest element must be
/// below this fraction of the largest element's area.
pub const CONFIRMED_ICON_MAX_RATIO: f64 = 0.025;

/// Why a snapshot was not the expected screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WrongScreenKind {
    /// A single classifier's markers did not match.
    Mismatch,
    /// itsme is in the foreground but no classifier recognized the screen.
    UnknownScreen,
    /// Another app is in the foreground.
    ForeignApp { package: String },
}

/// Expected non-match: the snapshot is not the screen a classifier looks for.
///
/// Always carries the snapshot so an operator can see what was on screen.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct WrongScreen {
    pub message: String,
    pub kind: WrongScreenKind,
    pub screen: UiTree,
    /// Every classifier's rejection, in the order they were tried. Only the
    /// dispatcher fills this in.
    pub parsers_tried: Vec<(ScreenParser, WrongScreen)>,
}

impl WrongScreen {
    pub fn mismatch(message: impl Into<String>, screen: &UiTree) -> Self {
        Self {
            message: message.into(),
            kind: WrongScreenKind::Mismatch,
            screen: screen.clone(),
            parsers_tried: Vec::new(),
        }
    }

    pub fn is_foreign_app(&self) -> bool {
        matches!(self.kind, WrongScreenKind::ForeignApp { .. })
    }

    /// `(classifier name, reason)` for each classifier the dispatcher tried.
    pub fn rejections(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.parsers_tried
            .iter()
            .map(|(parser, rejection)| (parser.name(), rejection.message.as_str()))
    }
}

/// Fetching a snapshot and classifying it can fail in two distinct ways.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    WrongScreen(#[from] WrongScreen),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown screen parser '{0}'")]
pub struct UnknownParser(pub String);

/// Selects a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenParser {
    #[default]
    Any,
    Home,
    Action,
    PostConfirm,
    ActionExpired,
    PlayRating,
    ActionConfirmed,
}

impl ScreenParser {
    /// Order in which [`parse_any_screen`] tries the specific classifiers.
    pub const DISPATCH_ORDER: [ScreenParser; 6] = [
        ScreenParser::Home,
        ScreenParser::Action,
        ScreenParser::PostConfirm,
        ScreenParser::ActionExpired,
        ScreenParser::PlayRating,
        ScreenParser::ActionConfirmed,
    ];

    /// Name of the classifier function, as reported in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ScreenParser::Any => "parse_any_screen",
            ScreenParser::Home => "parse_home_screen",
            ScreenParser::Action => "parse_action_screen",
            ScreenParser::PostConfirm => "parse_post_confirm_screen",
            ScreenParser::ActionExpired => "parse_action_expired_screen",
            ScreenParser::PlayRating => "parse_play_rating_screen",
            ScreenParser::ActionConfirmed => "parse_action_confirmed_screen",
        }
    }

    /// Short selector used on the command line and the wire.
    pub fn key(self) -> &'static str {
        match self {
            ScreenParser::Any => "any",
            ScreenParser::Home => "home",
            ScreenParser::Action => "action",
            ScreenParser::PostConfirm => "post_confirm",
            ScreenParser::ActionExpired => "action_expired",
            ScreenParser::PlayRating => "play_rating",
            ScreenParser::ActionConfirmed => "action_confirmed",
        }
    }

    pub fn parse(self, tree: &UiTree) -> Result<Screen, WrongScreen> {
        match self {
            ScreenParser::Any => parse_any_screen(tree),
            ScreenParser::Home => parse_home_screen(tree),
            ScreenParser::Action => parse_action_screen(tree),
            ScreenParser::PostConfirm => parse_post_confirm_screen(tree),
            ScreenParser::ActionExpired => parse_action_expired_screen(tree),
            ScreenParser::PlayRating => parse_play_rating_screen(tree),
            ScreenParser::ActionConfirmed => parse_action_confirmed_screen(tree),
        }
    }

    /// Fetch a fresh snapshot from `device` and classify it.
    pub async fn capture<D: Device + ?Sized>(self, device: &D) -> Result<Screen, CaptureError> {
        let tree = device.dump_hierarchy().await?;
        let screen = self.parse(&tree)?;
        debug!("{} classified {}", self.name(), screen.kind());
        Ok(screen)
    }
}

impl std::fmt::Display for ScreenParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ScreenParser {
    type Err = UnknownParser;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        std::iter::once(ScreenParser::Any)
            .chain(ScreenParser::DISPATCH_ORDER)
            .find(|parser| parser.key() == key)
            .ok_or_else(|| UnknownParser(s.to_string()))
    }
}

/// Zero or one match. More than one is an ambiguity and fails.
fn one_or_none<'a>(
    tree: &UiTree,
    mut nodes: impl Iterator<Item = UiNode<'a>>,
    what: &str,
) -> Result<Option<UiNode<'a>>, WrongScreen> {
    let first = nodes.next();
    if first.is_some() && nodes.next().is_some() {
        return Err(WrongScreen::mismatch(
            format!("More than one '{what}' found"),
            tree,
        ));
    }
    Ok(first)
}

fn single_text<'a>(tree: &'a UiTree, text: &'a str) -> Result<Option<UiNode<'a>>, WrongScreen> {
    one_or_none(tree, tree.nodes_with_text(text), text)
}

fn bounds_of(tree: &UiTree, node: UiNode<'_>) -> Result<Bounds, WrongScreen> {
    node.bounds()
        .map_err(|e| WrongScreen::mismatch(e.to_string(), tree))
}

/// Action, app and time: exactly three texts under `container`.
fn parse_basic_info(tree: &UiTree, container: UiNode<'_>) -> Result<ActionBasicInfo, WrongScreen> {
    match <[String; 3]>::try_from(container.collect_texts()) {
        Ok([action, app, time]) => Ok(ActionBasicInfo { action, app, time }),
        Err(texts) => Err(WrongScreen::mismatch(
            format!(
                "Expected 3 texts (action, app, time) in action info, found {}",
                texts.len()
            ),
            tree,
        )),
    }
}

/// Texts of the element following an optional section header.
fn section_texts(tree: &UiTree, header: &str) -> Result<Vec<String>, WrongScreen> {
    let Some(header_node) = single_text(tree, header)? else {
        return Ok(Vec::new());
    };
    let content = header_node.next_sibling().ok_or_else(|| {
        WrongScreen::mismatch(format!("'{header}' section has no content"), tree)
    })?;
    Ok(content.collect_texts())
}

/// A label whose parent also holds an `android.widget.Button`.
fn find_button<'a>(tree: &'a UiTree, label: &'a str) -> Result<UiNode<'a>, WrongScreen> {
    let candidates = tree.nodes_with_text(label).filter(|node| {
        node.parent().is_some_and(|parent| {
            parent.tag() == NODE_TAG
                && parent
                    .children()
                    .any(|sibling| sibling.class() == Some(BUTTON_CLASS))
        })
    });
    one_or_none(tree, candidates, label)?
        .ok_or_else(|| WrongScreen::mismatch(format!("'{label}' button not found"), tree))
}

pub fn parse_home_screen(tree: &UiTree) -> Result<Screen, WrongScreen> {
    let no_pending = single_text(tree, NO_PENDING_ACTIONS)?;
    let tap_the_card = single_text(tree, TAP_THE_CARD)?;

    let tap_the_card = match (no_pending, tap_the_card) {
        (Some(_), None) => return Ok(Screen::NoPendingActionsHome),
        (None, Some(node)) => node,
        (None, None) => {
            return Err(WrongScreen::mismatch(
                format!("Neither '{NO_PENDING_ACTIONS}' nor '{TAP_THE_CARD}' found"),
                tree,
            ))
        }
        (Some(_), Some(_)) => {
            return Err(WrongScreen::mismatch(
                format!("Both '{NO_PENDING_ACTIONS}' and '{TAP_THE_CARD}' found"),
                tree,
            ))
        }
    };

    let card = tap_the_card.next_sibling().ok_or_else(|| {
        WrongScreen::mismatch(format!("No action card after '{TAP_THE_CARD}'"), tree)
    })?;
    let children: Vec<UiNode<'_>> = card.children().filter(|c| c.tag() == NODE_TAG).collect();

    let (container, action_count) = match children.as_slice() {
        [container] => (*container, 1),
        [container, count_node] => {
            let resource_id = count_node.resource_id().unwrap_or_default();
            if resource_id != ACTION_COUNT_ID {
                return Err(WrongScreen::mismatch(
                    format!(
                        "Expected second child of action card to be {ACTION_COUNT_ID} (resource_id='{resource_id}')"
                    ),
                    tree,
                ));
            }
            let count = count_node.text().trim().parse::<u32>().map_err(|_| {
                WrongScreen::mismatch(
                    format!("Action count '{}' is not a number", count_node.text()),
                    tree,
                )
            })?;
            (*container, count)
        }
        other => {
            return Err(WrongScreen::mismatch(
                format!(
                    "Expected action card to have 1 or 2 children, found {}",
                    other.len()
                ),
                tree,
            ))
        }
    };

    let basic_info = parse_basic_info(tree, container)?;
    let card_center = bounds_of(tree, container)?.center();
    Ok(Screen::PendingActionsHome(PendingActionsHome {
        action_count,
        basic_info,
        card_center,
    }))
}

pub fn parse_action_screen(tree: &UiTree) -> Result<Screen, WrongScreen> {
    let marker = single_text(tree, SHARED_ID_DATA)?
        .ok_or_else(|| WrongScreen::mismatch(format!("'{SHARED_ID_DATA}' not found"), tree))?;

    let shared_data = marker
        .parent()
        .map(|parent| parent.collect_texts())
        .unwrap_or_default()
        .into_iter()
        .filter(|text| text != SHARED_ID_DATA)
        .collect();

    let info_card = tree
        .text_nodes()
        .next()
        .and_then(|first_text| first_text.parent())
        .ok_or_else(|| WrongScreen::mismatch("Action info card not found", tree))?;
    let basic_info = parse_basic_info(tree, info_card)?;

    let extra_info = section_texts(tree, INFO_HEADER)?;
    let details = section_texts(tree, DETAILS_HEADER)?;

    let confirm_center = bounds_of(tree, find_button(tree, CONFIRM_LABEL)?)?.center();
    let reject_center = bounds_of(tree, find_button(tree, REJECT_LABEL)?)?.center();

    debug!("Action screen: {}", basic_info);
    Ok(Screen::Action(ActionScreen {
        basic_info,
        extra_info,
        details,
        shared_data,
        confirm_center,
        reject_center,
    }))
}

/// Either the poka yoke image picker or the PIN pad, which follow a confirm.
pub fn parse_post_confirm_screen(tree: &UiTree) -> Result<Screen, WrongScreen> {
    let poka_yoke = single_text(tree, POKA_YOKE_PROMPT)?;
    let pin_entry = single_text(tree, PIN_PROMPT)?;

    match (poka_yoke, pin_entry) {
        (Some(_), None) => parse_poka_yoke(tree),
        (None, Some(_)) => parse_pinpad(tree),
        (None, None) => Err(WrongScreen::mismatch(
            format!("Neither '{POKA_YOKE_PROMPT}' nor '{PIN_PROMPT}' found"),
            tree,
        )),
        (Some(_), Some(_)) => Err(WrongScreen::mismatch(
            format!("Both '{POKA_YOKE_PROMPT}' and '{PIN_PROMPT}' found"),
            tree,
        )),
    }
}

fn parse_poka_yoke(tree: &UiTree) -> Result<Screen, WrongScreen> {
    let mut images = Vec::new();
    for node in tree.nodes() {
        let Some(suffix) = node
            .resource_id()
            .and_then(|id| id.strip_prefix(POKA_YOKE_IMAGE_PREFIX))
        else {
            continue;
        };
        let number = suffix.parse::<u32>().map_err(|_| {
            WrongScreen::mismatch(
                format!("Malformed poka yoke image id '{POKA_YOKE_IMAGE_PREFIX}{suffix}'"),
                tree,
            )
        })?;
        images.push(PokaYokeImage {
            number,
            center: bounds_of(tree, node)?.center(),
        });
    }
    Ok(Screen::PokaYoke(PokaYokeScreen { images }))
}

fn parse_pinpad(tree: &UiTree) -> Result<Screen, WrongScreen> {
    let pinpad = one_or_none(
        tree,
        tree.nodes().filter(|node| node.resource_id() == Some(PINPAD_ID)),
        PINPAD_ID,
    )?
    .ok_or_else(|| WrongScreen::mismatch("pinpad not found", tree))?;

    let image = bounds_of(tree, pinpad)?;
    Ok(Screen::Pinpad(PinpadScreen {
        pad_bounds: locate_pad(image),
    }))
}

pub fn parse_action_expired_screen(tree: &UiTree) -> Result<Screen, WrongScreen> {
    let expired = single_text(tree, ACTION_EXPIRED)?;
    let ok_button = single_text(tree, OK_LABEL)?;
    match (expired, ok_button) {
        (Some(_), Some(ok)) => Ok(Screen::ActionExpired(ActionExpiredScreen {
            ok_center: bounds_of(tree, ok)?.center(),
        })),
        _ => Err(WrongScreen::mismatch(
            format!("'{ACTION_EXPIRED}' or '{OK_LABEL}' button not found"),
            tree,
        )),
    }
}

pub fn parse_play_rating_screen(tree: &UiTree) -> Result<Screen, WrongScreen> {
    let disclaimer = one_or_none(
        tree,
        tree.text_nodes()
            .filter(|node| node.text().starts_with(PLAY_RATING_DISCLAIMER)),
        PLAY_RATING_DISCLAIMER,
    )?;
    let not_now = single_text(tree, NOT_NOW_LABEL)?;
    match (disclaimer, not_now) {
        (Some(_), Some(not_now)) => Ok(Screen::PlayRating(PlayRatingScreen {
            not_now_center: bounds_of(tree, not_now)?.center(),
        })),
        _ => Err(WrongScreen::mismatch(
            format!("Disclaimer or '{NOT_NOW_LABEL}' button not found"),
            tree,
        )),
    }
}

/// The screen shown after a successful confirmation: no text at all, and a
/// small check mark on an otherwise empty background.
pub fn parse_action_confirmed_screen(tree: &UiTree) -> Result<Screen, WrongScreen> {
    if tree.text_nodes().next().is_some() {
        return Err(WrongScreen::mismatch(
            "The action confirmed screen has no text",
            tree,
        ));
    }

    let areas = tree
        .nodes()
        .map(|node| bounds_of(tree, node).map(|bounds| bounds.surface_area()))
        .collect::<Result<Vec<_>, _>>()?;
    let (Some(&smallest), Some(&largest)) = (areas.iter().min(), areas.iter().max()) else {
        return Err(WrongScreen::mismatch(
            "The action confirmed screen has no elements",
            tree,
        ));
    };
    if largest == 0 {
        return Err(WrongScreen::mismatch(
            "The action confirmed screen has no visible area",
            tree,
        ));
    }

    if smallest as f64 / largest as f64 >= CONFIRMED_ICON_MAX_RATIO {
        return Err(WrongScreen::mismatch(
            "The action confirmed screen has no small elements",
            tree,
        ));
    }
    Ok(Screen::ActionConfirmed)
}

/// Try every classifier in [`ScreenParser::DISPATCH_ORDER`] and return the
/// first match.
///
/// When nothing matches, the error tells apart an unrecognized itsme screen
/// ([`WrongScreenKind::UnknownScreen`]) from another app being in front
/// ([`WrongScreenKind::ForeignApp`]). Both carry every classifier's reason.
pub fn parse_any_screen(tree: &UiTree) -> Result<Screen, WrongScreen> {
    let mut parsers_tried = Vec::with_capacity(ScreenParser::DISPATCH_ORDER.len());
    for parser in ScreenParser::DISPATCH_ORDER {
        match parser.parse(tree) {
            Ok(screen) => return Ok(screen),
            Err(rejection) => parsers_tried.push((parser, rejection)),
        }
    }

    let package = tree
        .top_level_node()
        .and_then(|node| node.package())
        .unwrap_or_default();

    if package == ITSME_PACKAGE {
        let names: Vec<&str> = ScreenParser::DISPATCH_ORDER
            .iter()
            .map(|parser| parser.name())
            .collect();
        return Err(WrongScreen {
            message: format!("Unknown screen (none of {} matched)", names.join(", ")),
            kind: WrongScreenKind::UnknownScreen,
            screen: tree.clone(),
            parsers_tried,
        });
    }

    Err(WrongScreen {
        message: format!(
            "Unknown screen (no parsers matched). Top level package: {package} (expected {ITSME_PACKAGE})"
        ),
        kind: WrongScreenKind::ForeignApp {
            package: package.to_string(),
        },
        screen: tree.clone(),
        parsers_tried,
    })
}
