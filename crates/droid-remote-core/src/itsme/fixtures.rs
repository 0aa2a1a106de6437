//! Synthetic uiautomator dumps of the itsme screens, for tests.

use super::parse::ITSME_PACKAGE;

pub const APP: &str = "My Bank";
pub const ACTION: &str = "Log in";
pub const TIME: &str = "12:03";

pub fn text(text: &str, bounds: &str) -> String {
    format!(
        r#"<node index="0" text="{text}" resource-id="" class="android.widget.TextView" package="{ITSME_PACKAGE}" content-desc="" clickable="false" bounds="{bounds}" />"#
    )
}

pub fn view(bounds: &str, children: &str) -> String {
    format!(
        r#"<node index="0" text="" resource-id="" class="android.view.View" package="{ITSME_PACKAGE}" content-desc="" clickable="false" bounds="{bounds}">{children}</node>"#
    )
}

pub fn with_id(resource_id: &str, text: &str, bounds: &str) -> String {
    format!(
        r#"<node index="0" text="{text}" resource-id="{resource_id}" class="android.widget.ImageView" package="{ITSME_PACKAGE}" content-desc="" clickable="true" bounds="{bounds}" />"#
    )
}

pub fn button(bounds: &str) -> String {
    format!(
        r#"<node index="0" text="" resource-id="" class="android.widget.Button" package="{ITSME_PACKAGE}" content-desc="" clickable="true" bounds="{bounds}" />"#
    )
}

/// A full dump whose top-level window belongs to `package`.
pub fn dump_of(package: &str, body: &str) -> String {
    format!(
        r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?><hierarchy rotation="0"><node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="{package}" content-desc="" clickable="false" bounds="[0,0][1080,2400]">{body}</node></hierarchy>"#
    )
}

pub fn itsme(body: &str) -> String {
    dump_of(ITSME_PACKAGE, body)
}

pub fn basic_info(action: &str, app: &str, time: &str) -> String {
    view(
        "[40,400][900,900]",
        &[
            text(action, "[80,440][860,520]"),
            text(app, "[80,560][860,640]"),
            text(time, "[80,680][860,760]"),
        ]
        .concat(),
    )
}

pub fn home_no_pending() -> String {
    itsme(&text("No pending actions", "[100,1000][980,1080]"))
}

/// Home screen with the card's children given verbatim.
pub fn home_with_card(card_children: &str) -> String {
    itsme(&view(
        "[0,200][1080,2000]",
        &[
            text("Tap the card to open", "[40,300][1040,360]"),
            view("[40,400][1040,900]", card_children),
        ]
        .concat(),
    ))
}

/// Pending-action home screen. The card center is `(470, 650)`.
pub fn home_pending(app: &str, action: &str, count: Option<u32>) -> String {
    let mut children = basic_info(action, app, TIME);
    if let Some(count) = count {
        children.push_str(&with_id(
            "action_count_tag",
            &count.to_string(),
            "[950,420][1020,480]",
        ));
    }
    home_with_card(&children)
}

/// Action screen. Confirm is centered at `(810, 2100)`, Reject at `(270, 2100)`.
pub fn action(app: &str, action: &str, info: &[&str], details: &[&str]) -> String {
    let mut body = view(
        "[0,100][1080,400]",
        &[
            text(action, "[40,120][1040,180]"),
            text(app, "[40,200][1040,260]"),
            text(TIME, "[40,280][1040,340]"),
        ]
        .concat(),
    );
    if !info.is_empty() {
        body.push_str(&text("Info", "[40,420][1040,480]"));
        body.push_str(&view("[40,500][1040,700]", &section(info, 520)));
    }
    if !details.is_empty() {
        body.push_str(&text("Details", "[40,720][1040,780]"));
        body.push_str(&view("[40,800][1040,1000]", &section(details, 820)));
    }
    body.push_str(&view(
        "[0,1100][1080,1500]",
        &[
            text("Shared ID data", "[40,1120][1040,1180]"),
            text("Name", "[40,1200][1040,1260]"),
            text("Date of birth", "[40,1280][1040,1340]"),
        ]
        .concat(),
    ));
    body.push_str(&view(
        "[0,2000][540,2200]",
        &[button("[0,2000][540,2200]"), text("Reject", "[100,2050][440,2150]")].concat(),
    ));
    body.push_str(&view(
        "[540,2000][1080,2200]",
        &[button("[540,2000][1080,2200]"), text("Confirm", "[640,2050][980,2150]")].concat(),
    ));
    itsme(&body)
}

fn section(lines: &[&str], top: i32) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let y = top + i as i32 * 60;
            text(line, &format!("[40,{}][1040,{}]", y, y + 50))
        })
        .collect()
}

/// Poka yoke screen; image `n` of the list is centered at `(200 + 300 * i, 1250)`.
pub fn poka_yoke(numbers: &[u32]) -> String {
    let mut body = text("Check and tap the icon to continue.", "[40,600][1040,700]");
    for (i, number) in numbers.iter().enumerate() {
        let left = 100 + 300 * i as i32;
        body.push_str(&with_id(
            &format!("image_{number}"),
            "",
            &format!("[{},1150][{},1350]", left, left + 200),
        ));
    }
    itsme(&body)
}

pub fn pinpad(image_bounds: &str) -> String {
    itsme(
        &[
            text("Confirm with your itsme code", "[40,600][1040,700]"),
            with_id("pinpad", "", image_bounds),
        ]
        .concat(),
    )
}

pub fn action_expired() -> String {
    itsme(
        &[
            text("Action has expired", "[40,900][1040,1000]"),
            text("OK", "[440,1500][640,1600]"),
        ]
        .concat(),
    )
}

pub fn play_rating() -> String {
    dump_of(
        "com.android.vending",
        &[
            text(
                "Reviews are public and include your account and device info. Learn more",
                "[40,1500][1040,1600]",
            ),
            text("Not now", "[500,1700][760,1800]"),
            text("Post", "[780,1700][1040,1800]"),
        ]
        .concat(),
    )
}

/// Green screen with a single check mark icon.
pub fn action_confirmed() -> String {
    itsme(&view(
        "[0,0][1080,2400]",
        &with_id("", "", "[490,1150][590,1250]"),
    ))
}

pub fn foreign_app() -> String {
    dump_of(
        "com.android.launcher3",
        &text("Phone", "[40,2200][240,2300]"),
    )
}

pub fn unknown_itsme() -> String {
    itsme(&text("Settings", "[40,200][1040,300]"))
}
