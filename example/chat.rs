//! minimal bevy + bevy_ws_chat example.
//! - connects to `WS_CHAT_ORIGIN` (default http://127.0.0.1:8000) at /ws/chat.
//! - enter sends, shift+enter inserts a newline, backspace deletes.
//! - transcript, typing indicator and connection status are driven purely by
//!   `ViewUpdate` events.
//!
//! bevy text can't show html, so rendered markup is flattened back to text
//! (code spans keep their backticks, code blocks get an indent).

use bevy::input::keyboard::{KeyCode, KeyboardInput};
use bevy::prelude::*;
use bevy::ui::ScrollPosition;
use bevy_ws_chat::{ChatConfig, ChatSet, PageOrigin, Role, ViewUpdate, WsChatPlugin, send_user_text};

// ---------------------- ui tags ----------------------

#[derive(Component)]
struct TranscriptBox;
#[derive(Component)]
struct EntryText(usize, Role);
#[derive(Component)]
struct TypingText;
#[derive(Component)]
struct StatusText;
#[derive(Component)]
struct PromptText;

// ---------------------- app state ----------------------

#[derive(Resource, Default)]
struct PromptBuf(String);

#[derive(Resource)]
struct InputState {
    enabled: bool,
    focused: bool,
}

impl Default for InputState {
    fn default() -> Self {
        Self { enabled: true, focused: true }
    }
}

// ---------------------- main ----------------------

fn main() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let mut app = App::new();
    app.insert_resource(ClearColor(Color::srgb_u8(18, 18, 20)))
        .insert_resource(PromptBuf::default())
        .insert_resource(InputState::default());

    // in the browser the plugin follows the page origin on its own
    #[cfg(not(target_arch = "wasm32"))]
    {
        let origin =
            std::env::var("WS_CHAT_ORIGIN").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());
        let config = match PageOrigin::parse(&origin) {
            Ok(origin) => ChatConfig::with_origin(origin),
            Err(err) => {
                warn!(target: "chat_demo", "{err}; using default origin");
                ChatConfig::default()
            }
        };
        info!(target: "chat_demo", "endpoint: {}", config.endpoint());
        app.insert_resource(config);
    }

    app.add_plugins(DefaultPlugins)
        .add_plugins(WsChatPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, (handle_text_input, refresh_prompt_text))
        // view readers should run after bevy_ws_chat applies events
        .add_systems(Update, on_view_updates.after(ChatSet::Apply))
        .run();
}

// ---------------------- setup ui ----------------------

fn setup(mut commands: Commands) {
    commands.spawn(Camera2d);

    let style_16 = TextFont { font_size: 16.0, ..default() };
    let style_14 = TextFont { font_size: 14.0, ..default() };

    commands
        .spawn((
            Node {
                width: Val::Percent(100.0),
                height: Val::Percent(100.0),
                flex_direction: FlexDirection::Column,
                row_gap: Val::Px(8.0),
                padding: UiRect::all(Val::Px(12.0)),
                ..default()
            },
            BackgroundColor(Color::NONE),
        ))
        .with_children(|p| {
            p.spawn((
                Text::new("connecting..."),
                style_14.clone(),
                TextColor(Color::srgb(0.7, 0.7, 0.3)),
                StatusText,
            ));

            // scrolling transcript
            p.spawn((
                Node {
                    width: Val::Percent(100.0),
                    flex_grow: 1.0,
                    flex_direction: FlexDirection::Column,
                    row_gap: Val::Px(6.0),
                    padding: UiRect::all(Val::Px(8.0)),
                    overflow: Overflow::scroll_y(),
                    ..default()
                },
                BackgroundColor(Color::srgb(0.10, 0.10, 0.12)),
                ScrollPosition::default(),
                TranscriptBox,
            ));

            p.spawn((
                Text::new("assistant is typing..."),
                style_14.clone(),
                TextColor(Color::srgb_u8(150, 150, 150)),
                Visibility::Hidden,
                TypingText,
            ));

            p.spawn((
                Text::new("> "),
                style_16.clone(),
                TextColor(Color::WHITE),
                PromptText,
            ));
        });
}

// ---------------------- input ----------------------

fn handle_text_input(
    mut commands: Commands,
    mut ev_kbd: EventReader<KeyboardInput>,
    keys: Res<ButtonInput<KeyCode>>,
    mut prompt: ResMut<PromptBuf>,
    input: Res<InputState>,
) {
    if !input.enabled {
        ev_kbd.clear();
        return;
    }

    let shift = keys.pressed(KeyCode::ShiftLeft) || keys.pressed(KeyCode::ShiftRight);
    for ev in ev_kbd.read() {
        if !ev.state.is_pressed() {
            continue;
        }
        match ev.key_code {
            KeyCode::Enter | KeyCode::NumpadEnter => {
                if shift {
                    prompt.0.push('\n');
                } else {
                    // the controller trims and ignores blank input
                    send_user_text(&mut commands, prompt.0.clone());
                }
            }
            KeyCode::Backspace => {
                prompt.0.pop();
            }
            _ => {
                if let Some(txt) = &ev.text {
                    let s = txt.replace(['\r', '\n'], "");
                    prompt.0.push_str(&s);
                }
            }
        }
    }
}

fn refresh_prompt_text(
    prompt: Res<PromptBuf>,
    input: Res<InputState>,
    mut q_prompt: Query<(&mut Text, &mut TextColor), With<PromptText>>,
) {
    if prompt.is_changed() || input.is_changed() {
        if let Ok((mut t, mut color)) = q_prompt.single_mut() {
            let caret = if input.enabled && input.focused { " |" } else { "" };
            t.0 = format!("> {}{}", prompt.0, caret);
            color.0 = if input.enabled {
                Color::WHITE
            } else {
                Color::srgb_u8(110, 110, 110)
            };
        }
    }
}

// ---------------------- chat view ----------------------

fn role_color(role: Role) -> Color {
    match role {
        Role::User => Color::srgb_u8(140, 190, 255),
        Role::Assistant => Color::WHITE,
        Role::System => Color::srgb_u8(255, 170, 90),
    }
}

fn on_view_updates(
    mut commands: Commands,
    mut ev: EventReader<ViewUpdate>,
    mut prompt: ResMut<PromptBuf>,
    mut input: ResMut<InputState>,
    q_box: Query<Entity, With<TranscriptBox>>,
    mut q_scroll: Query<&mut ScrollPosition, With<TranscriptBox>>,
    mut q_typing: Query<&mut Visibility, With<TypingText>>,
    mut q_status: Query<&mut Text, With<StatusText>>,
) {
    let Ok(container) = q_box.single() else { return };
    for update in ev.read() {
        match update {
            ViewUpdate::EntryAppended { index, role } => {
                let entry = commands
                    .spawn((
                        Text::new(format!("{}: ", role.as_str())),
                        TextFont { font_size: 16.0, ..default() },
                        TextColor(role_color(*role)),
                        EntryText(*index, *role),
                    ))
                    .id();
                commands.entity(container).add_child(entry);
            }
            ViewUpdate::EntryRendered { index, html } => {
                // queued after the spawn above, so same-frame entries exist by then
                let index = *index;
                let body = markup_to_text(html);
                commands.queue(move |world: &mut World| {
                    let mut q = world.query::<(&EntryText, &mut Text)>();
                    for (EntryText(i, role), mut text) in q.iter_mut(world) {
                        if *i == index {
                            text.0 = format!("{}: {}", role.as_str(), body);
                        }
                    }
                });
            }
            ViewUpdate::ScrollToBottom => {
                if let Ok(mut scroll) = q_scroll.single_mut() {
                    scroll.offset_y = f32::MAX;
                }
            }
            ViewUpdate::InputEnabled(enabled) => input.enabled = *enabled,
            ViewUpdate::ClearInput => prompt.0.clear(),
            ViewUpdate::FocusInput => input.focused = true,
            ViewUpdate::ShowTyping => {
                if let Ok(mut vis) = q_typing.single_mut() {
                    *vis = Visibility::Inherited;
                }
            }
            ViewUpdate::RemoveTyping => {
                if let Ok(mut vis) = q_typing.single_mut() {
                    *vis = Visibility::Hidden;
                }
            }
            ViewUpdate::Connection(open) => {
                if let Ok(mut t) = q_status.single_mut() {
                    t.0 = if *open {
                        "connected".to_string()
                    } else {
                        "disconnected, reconnecting...".to_string()
                    };
                }
            }
        }
    }
}

// ---------------------- markup -> plain text ----------------------

const PRE_OPEN: &str = "<pre><code class=\"language-";
const PRE_CLOSE: &str = "</code></pre>";

/// flatten the formatter's markup for a plain text widget.
fn markup_to_text(html: &str) -> String {
    let mut out = String::new();
    let mut rest = html;
    while let Some(start) = rest.find(PRE_OPEN) {
        out.push_str(&inline_to_text(&rest[..start]));
        let after = &rest[start + PRE_OPEN.len()..];
        let (lang, after) = after.split_once("\">").unwrap_or(("", after));
        let (code, after) = after.split_once(PRE_CLOSE).unwrap_or((after, ""));
        out.push_str(&format!("\n[{}]\n", if lang.is_empty() { "code" } else { lang }));
        for line in unescape(code).lines() {
            out.push_str("    ");
            out.push_str(line);
            out.push('\n');
        }
        rest = after;
    }
    out.push_str(&inline_to_text(rest));
    out
}

fn inline_to_text(s: &str) -> String {
    unescape(&s.replace("<br>", "\n").replace("<code>", "`").replace("</code>", "`"))
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&amp;", "&")
}
