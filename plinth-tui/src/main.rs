/*!
 * Plinth Appliance Console
 * Operator TUI for plinthd
 */

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use tokio::time::{interval, Duration};
use tui_input::backend::crossterm::EventHandler;

mod app;
mod client;
mod ui;

use app::{App, Dialog, FocusedPanel};
use ui::render_ui;

#[derive(Parser)]
#[command(name = "plinth")]
#[command(about = "Plinth Appliance Console")]
struct Cli {
    /// Daemon socket path
    #[arg(short, long, default_value = "/run/plinth/plinth.sock")]
    socket: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Connect before entering the alternate screen
    let mut app = App::new(&cli.socket).await?;

    // Initialize terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    // Render tick; the daemon is polled on every fifth one
    let mut ticker = interval(Duration::from_millis(200));
    let mut ticks: u32 = 0;

    loop {
        // Handle events
        while event::poll(Duration::from_millis(0))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && !handle_key(app, key).await? {
                    return Ok(());
                }
            }
        }

        ticker.tick().await;
        ticks = ticks.wrapping_add(1);
        if ticks % 5 == 0 {
            app.update().await?;
        }

        terminal.draw(|f| render_ui(f, app))?;
    }
}

/// Returns false when the operator asked to quit.
async fn handle_key(app: &mut App, key: KeyEvent) -> Result<bool> {
    if !matches!(app.dialog, Dialog::None) {
        handle_dialog_key(app, key).await?;
        return Ok(true);
    }

    match key.code {
        KeyCode::Char('q') => return Ok(false),
        KeyCode::Up => app.previous_item(),
        KeyCode::Down => app.next_item(),
        KeyCode::Tab => app.next_panel(),
        KeyCode::Char('s') => app.toggle_scan().await?,
        KeyCode::Char('b') => app.toggle_power().await?,
        KeyCode::Char('p') => app.pair_selected().await?,
        KeyCode::Char('f') => app.forget_selected().await?,
        KeyCode::Char('+') | KeyCode::Char('=') => app.brightness_up().await?,
        KeyCode::Char('-') => app.brightness_down().await?,
        KeyCode::Char('w') => app.open_write_dialog(),
        KeyCode::Char('t') => app.open_datetime_dialog(),
        KeyCode::Char('z') => app.open_timezone_dialog().await?,
        KeyCode::Char('r') => app.refresh_data().await?,
        KeyCode::Enter => {
            if app.focused_panel == FocusedPanel::Files {
                app.read_selected_file().await?;
            }
        }
        _ => {}
    }
    Ok(true)
}

async fn handle_dialog_key(app: &mut App, key: KeyEvent) -> Result<()> {
    match key.code {
        KeyCode::Esc => app.dialog = Dialog::None,
        KeyCode::Enter => {
            if matches!(app.dialog, Dialog::WriteFile { .. }) {
                app.submit_write_dialog().await?;
            } else if matches!(app.dialog, Dialog::SetDateTime { .. }) {
                app.submit_datetime_dialog().await?;
            } else if matches!(app.dialog, Dialog::Timezones { .. }) {
                app.submit_timezone_dialog().await?;
            } else {
                app.dialog = Dialog::None;
            }
        }
        KeyCode::Tab => match &mut app.dialog {
            Dialog::WriteFile {
                editing_content, ..
            } => *editing_content = !*editing_content,
            Dialog::SetDateTime { editing_time, .. } => *editing_time = !*editing_time,
            _ => {}
        },
        KeyCode::Up => app.timezone_up(),
        KeyCode::Down => app.timezone_down(),
        _ => match &mut app.dialog {
            Dialog::WriteFile {
                name,
                content,
                editing_content,
            } => {
                let target = if *editing_content { content } else { name };
                target.handle_event(&Event::Key(key));
            }
            Dialog::SetDateTime {
                date,
                time,
                editing_time,
            } => {
                let target = if *editing_time { time } else { date };
                target.handle_event(&Event::Key(key));
            }
            Dialog::Timezones {
                filter, selected, ..
            } => {
                // Any edit restarts the selection at the top match
                filter.handle_event(&Event::Key(key));
                *selected = 0;
            }
            _ => {}
        },
    }
    Ok(())
}
