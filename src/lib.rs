//! bevy_ws_chat: a bevy chat client over a websocket (native + wasm).
//!
//! - keeps exactly one channel to `(ws|wss)://<host>/ws/chat` open, and
//!   reopens it 3s after every loss, forever.
//! - streams `{"chunk": ...}` frames into one assistant entry per reply and
//!   finalizes it on `{"done": true}`; `{"error": ...}` ends the turn.
//! - gates input while a reply is in flight, retries a send once (after 1s)
//!   when the channel happened to be closed.
//! - renders entries with code blocks, inline code and line breaks.
//! - never blocks the main thread: sockets live on a tiny tokio runtime
//!   (native) or the browser event loop (wasm) and report back through a
//!   bounded inbox drained once per frame.
//!
//! host ui: send `SubmitText`, read `ViewUpdate` in systems ordered
//! `.after(ChatSet::Apply)`.

use bevy::prelude::*;

pub mod config;
pub mod connection;
pub mod error;
pub mod format;
pub mod protocol;
pub mod transcript;
pub mod transport;

pub use config::{ChatConfig, PageOrigin};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::ChatError;
pub use format::{escape_html, render_text};
pub use protocol::{ChannelEvent, ClientFrame, ServerFrame};
pub use transcript::{Role, StreamState, Submit, TranscriptController, TranscriptEntry, ViewUpdate};
pub use transport::{Channel, EventSink, Transport, TransportEvent};

#[cfg(not(target_arch = "wasm32"))]
pub use transport::{TokioRt, TokioTransport};
#[cfg(target_arch = "wasm32")]
pub use transport::BrowserTransport;

/// system ordering so uis can run after we apply events
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum ChatSet {
    /// connection timers + inbox drain, emits `ChannelEvent`s
    Pump,
    /// transcript updates, emits `ViewUpdate`s
    Apply,
}

/// the user submitted the input box.
#[derive(Event, Debug, Clone)]
pub struct SubmitText(pub String);

/// helper to submit text from any system with `Commands`.
pub fn send_user_text(commands: &mut Commands, text: impl Into<String>) {
    let text = text.into();
    debug!(target: "bevy_ws_chat", "send_user_text (len={})", text.len());
    commands.send_event(SubmitText(text));
}

/// bevy plugin: wires systems, events, resources.
///
/// uses a caller-inserted `ChatConfig` / `ConnectionManager` when present
/// (insert them before adding the plugin); otherwise builds defaults, which
/// on wasm means "the page we were served from".
#[derive(Default)]
pub struct WsChatPlugin;

impl Plugin for WsChatPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "bevy_ws_chat", "WsChatPlugin: build()");

        if app.world().get_resource::<ChatConfig>().is_none() {
            app.insert_resource(default_config());
        }
        let config = app.world().resource::<ChatConfig>().clone();

        if app.world().get_non_send_resource::<ConnectionManager>().is_none() {
            let transport = default_transport(app);
            app.insert_non_send_resource(ConnectionManager::new(config.clone(), transport));
        }
        if app.world().get_resource::<TranscriptController>().is_none() {
            app.insert_resource(TranscriptController::new(&config));
        }

        app.add_event::<ChannelEvent>()
            .add_event::<SubmitText>()
            .add_event::<ViewUpdate>()
            .configure_sets(Update, (ChatSet::Pump, ChatSet::Apply).chain())
            .add_systems(Startup, start_connection)
            .add_systems(Update, pump_connection.in_set(ChatSet::Pump))
            .add_systems(
                Update,
                (submit_user_text, apply_channel_events, tick_send_retry, flush_view_updates)
                    .chain()
                    .in_set(ChatSet::Apply),
            );
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn default_config() -> ChatConfig {
    ChatConfig::default()
}

#[cfg(target_arch = "wasm32")]
fn default_config() -> ChatConfig {
    ChatConfig::from_page().unwrap_or_else(|err| {
        warn!(target: "bevy_ws_chat", "{}; falling back to default origin", err);
        ChatConfig::default()
    })
}

#[cfg(not(target_arch = "wasm32"))]
fn default_transport(app: &mut App) -> Box<dyn Transport> {
    if app.world().get_resource::<TokioRt>().is_none() {
        app.insert_resource(TokioRt::default());
    }
    Box::new(TokioTransport::new(app.world().resource::<TokioRt>()))
}

#[cfg(target_arch = "wasm32")]
fn default_transport(_app: &mut App) -> Box<dyn Transport> {
    Box::new(BrowserTransport)
}

fn start_connection(mut conn: NonSendMut<ConnectionManager>) {
    conn.start();
}

fn pump_connection(
    time: Res<Time>,
    mut conn: NonSendMut<ConnectionManager>,
    mut ev_channel: EventWriter<ChannelEvent>,
) {
    conn.tick(time.delta());
    let events = conn.pump();
    if !events.is_empty() {
        ev_channel.write_batch(events);
    }
}

fn submit_user_text(
    mut ev_submit: EventReader<SubmitText>,
    mut transcript: ResMut<TranscriptController>,
    mut conn: NonSendMut<ConnectionManager>,
) {
    for SubmitText(text) in ev_submit.read() {
        let outcome = transcript.submit(text, &mut conn);
        debug!(target: "bevy_ws_chat", "submit -> {:?}", outcome);
    }
}

fn apply_channel_events(
    mut ev_channel: EventReader<ChannelEvent>,
    mut transcript: ResMut<TranscriptController>,
) {
    for ev in ev_channel.read() {
        transcript.handle_event(ev);
    }
}

fn tick_send_retry(
    time: Res<Time>,
    mut transcript: ResMut<TranscriptController>,
    mut conn: NonSendMut<ConnectionManager>,
) {
    transcript.tick(time.delta(), &mut conn);
}

fn flush_view_updates(
    mut transcript: ResMut<TranscriptController>,
    mut ev_view: EventWriter<ViewUpdate>,
) {
    let updates = transcript.take_updates();
    if !updates.is_empty() {
        ev_view.write_batch(updates);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{self, MockTransport};
    use bevy::app::AppExit;
    use pretty_assertions::assert_eq;

    fn test_app() -> (App, MockTransport) {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.add_event::<AppExit>();

        let transport = MockTransport::default();
        let config = ChatConfig::with_origin(PageOrigin::new(true, "chat.test"));
        app.insert_resource(config.clone());
        app.insert_non_send_resource(ConnectionManager::new(config, Box::new(transport.clone())));
        app.add_plugins(WsChatPlugin);
        (app, transport)
    }

    fn drain_views(app: &mut App) -> Vec<ViewUpdate> {
        let mut ev = app.world_mut().resource_mut::<Events<ViewUpdate>>();
        ev.drain().collect()
    }

    #[test]
    fn startup_opens_channel_to_page_host() {
        let (mut app, transport) = test_app();
        app.update();
        let st = transport.state();
        assert_eq!(st.borrow().opens.len(), 1);
        assert_eq!(st.borrow().opens[0].0, "wss://chat.test/ws/chat");
        assert_eq!(
            app.world().non_send_resource::<ConnectionManager>().state(),
            ConnectionState::Connecting
        );
    }

    #[test]
    fn full_turn_through_the_plugin() {
        let (mut app, transport) = test_app();
        app.update();
        let st = transport.state();
        mock::emit(&st, TransportEvent::Opened);
        app.update();
        assert!(app.world().non_send_resource::<ConnectionManager>().is_open());
        drain_views(&mut app);

        app.world_mut().send_event(SubmitText("hi".into()));
        app.update();
        assert_eq!(st.borrow().sent, vec![r#"{"message":"hi"}"#.to_string()]);
        let views = drain_views(&mut app);
        assert!(views.contains(&ViewUpdate::InputEnabled(false)));
        assert!(views.contains(&ViewUpdate::ShowTyping));

        mock::frame(&st, r#"{"chunk":"He"}"#);
        mock::frame(&st, r#"{"chunk":"llo"}"#);
        mock::frame(&st, r#"{"done":true}"#);
        app.update();

        let transcript = app.world().resource::<TranscriptController>();
        assert_eq!(
            transcript.entries(),
            &[
                TranscriptEntry::new(Role::User, "hi"),
                TranscriptEntry::new(Role::Assistant, "Hello"),
            ]
        );
        assert!(transcript.input_enabled());
        assert!(!transcript.typing_indicator());

        let views = drain_views(&mut app);
        assert!(views.contains(&ViewUpdate::EntryRendered { index: 1, html: "Hello".into() }));
        assert_eq!(views.last(), Some(&ViewUpdate::FocusInput));
    }

    #[test]
    fn send_user_text_queues_submit_event() {
        let (mut app, _transport) = test_app();
        {
            let mut commands = app.world_mut().commands();
            super::send_user_text(&mut commands, "hello world");
        }
        app.world_mut().flush();

        let mut ev = app.world_mut().resource_mut::<Events<SubmitText>>();
        let submitted: Vec<_> = ev.drain().map(|SubmitText(t)| t).collect();
        assert_eq!(submitted, vec!["hello world".to_string()]);
    }

    #[test]
    fn keeps_caller_inserted_resources() {
        let (app, _transport) = test_app();
        assert_eq!(app.world().resource::<ChatConfig>().endpoint(), "wss://chat.test/ws/chat");
        #[cfg(not(target_arch = "wasm32"))]
        assert!(app.world().get_resource::<TokioRt>().is_none());
    }
}
