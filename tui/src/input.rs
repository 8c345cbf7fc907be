//! Input handling for the tasklab TUI.

use anyhow::{Result, anyhow};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;

use tasklab_engine::{App, Trigger};

const INPUT_POLL_TIMEOUT: Duration = Duration::from_millis(25); // shutdown responsiveness
const INPUT_CHANNEL_CAPACITY: usize = 1024; // bounded: no OOM
const MAX_EVENTS_PER_FRAME: usize = 64; // never starve rendering

enum InputMsg {
    Event(Event),
    Error(String),
}

/// Blocking crossterm reader on its own thread, drained once per frame.
pub struct InputPump {
    rx: mpsc::Receiver<InputMsg>,
    stop: Arc<AtomicBool>,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl InputPump {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = stop.clone();

        let join = tokio::task::spawn_blocking(move || input_loop(&stop2, &tx));
        Self {
            rx,
            stop,
            join: Some(join),
        }
    }

    pub async fn shutdown(&mut self) {
        // Unblock a reader stuck on a full channel before asking it to stop.
        self.rx.close();

        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), join).await;
        }
    }
}

impl Default for InputPump {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InputPump {
    fn drop(&mut self) {
        // Do not block in Drop.
        self.rx.close();
        self.stop.store(true, Ordering::Release);
    }
}

fn input_loop(stop: &AtomicBool, tx: &mpsc::Sender<InputMsg>) {
    while !stop.load(Ordering::Acquire) {
        match event::poll(INPUT_POLL_TIMEOUT) {
            Ok(true) => match event::read() {
                Ok(ev) => {
                    // Backpressure instead of dropping keys.
                    if tx.blocking_send(InputMsg::Event(ev)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(InputMsg::Error(e.to_string()));
                    break;
                }
            },
            Ok(false) => {}
            Err(e) => {
                let _ = tx.blocking_send(InputMsg::Error(e.to_string()));
                break;
            }
        }
    }
}

/// Apply pending input. Returns `true` once the app should quit.
pub fn handle_events(app: &mut App, input: &mut InputPump) -> Result<bool> {
    let mut processed = 0;
    while processed < MAX_EVENTS_PER_FRAME {
        let ev = match input.rx.try_recv() {
            Ok(InputMsg::Event(ev)) => ev,
            Ok(InputMsg::Error(msg)) => return Err(anyhow!("input error: {msg}")),
            Err(mpsc::error::TryRecvError::Empty) => break,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                return Err(anyhow!("input pump disconnected"));
            }
        };

        if apply_event(app, &ev) {
            return Ok(true);
        }
        processed += 1;
    }
    Ok(app.should_quit())
}

pub(crate) fn apply_event(app: &mut App, event: &Event) -> bool {
    if let Event::Key(key) = event {
        // Press + repeat only
        if matches!(key.kind, KeyEventKind::Release) {
            return app.should_quit();
        }
        handle_key(app, *key);
    }
    app.should_quit()
}

fn handle_key(app: &mut App, key: KeyEvent) {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        app.request_quit();
        return;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => app.request_quit(),
        KeyCode::Left | KeyCode::Char('h') | KeyCode::BackTab => app.select_prev(),
        KeyCode::Right | KeyCode::Char('l') | KeyCode::Tab => app.select_next(),
        KeyCode::Enter | KeyCode::Char(' ') => app.activate_selected(),
        KeyCode::Char(c) => {
            if let Some(trigger) = Trigger::from_hotkey(c) {
                app.select(trigger);
                app.trigger(trigger);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use crossterm::event::KeyEventState;
    use tasklab_engine::{DemoTimings, Scheduler, UiOptions};

    use super::*;

    fn key(code: KeyCode) -> Event {
        key_with(code, KeyModifiers::NONE)
    }

    fn key_with(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn test_app() -> App {
        App::new(Scheduler::current(), DemoTimings::default(), UiOptions::default())
    }

    #[tokio::test]
    async fn hotkey_fires_trigger_and_selects_it() {
        let mut app = test_app();
        assert!(!apply_event(&mut app, &key(KeyCode::Char('4'))));
        assert_eq!(app.selected(), Trigger::AddOne);
        assert_eq!(app.counter(), 1);
    }

    #[tokio::test]
    async fn arrows_move_selection_and_enter_activates() {
        let mut app = test_app();
        for _ in 0..3 {
            apply_event(&mut app, &key(KeyCode::Right));
        }
        assert_eq!(app.selected(), Trigger::AddOne);
        apply_event(&mut app, &key(KeyCode::Enter));
        apply_event(&mut app, &key(KeyCode::Left));
        assert_eq!(app.selected(), Trigger::Async);
        assert_eq!(app.counter(), 1);
    }

    #[tokio::test]
    async fn release_events_are_ignored() {
        let mut app = test_app();
        let release = Event::Key(KeyEvent {
            code: KeyCode::Char('4'),
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        });
        apply_event(&mut app, &release);
        assert_eq!(app.counter(), 0);
    }

    #[tokio::test]
    async fn q_and_ctrl_c_quit() {
        let mut app = test_app();
        assert!(apply_event(&mut app, &key(KeyCode::Char('q'))));

        let mut app = test_app();
        assert!(apply_event(
            &mut app,
            &key_with(KeyCode::Char('c'), KeyModifiers::CONTROL)
        ));
    }
}
