use std::{
    io::{self, Write},
    path::Path,
};

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind},
    execute, terminal,
};

use crate::{
    config::Config,
    logging::stream::{sse_frame, StreamPublisher},
    manager::task_manager::JobManager,
    models::{input::StartInputs, task::TaskId},
};

const HELP: &[&str] = &[
    "start <credentials-file> <target|target-file> <messages-file> [seconds|speed-file]",
    "stop <id>        stop one task",
    "stopall          stop every task",
    "list             show active tasks",
    "logs             print the whole console buffer",
    "watch [all] [json]  follow the console until a key is pressed",
    "exit             stop everything and quit",
];

/// Leaves raw mode however the console loop ends.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

pub fn run_cli(manager: &JobManager, publisher: &StreamPublisher, config: &Config) -> io::Result<()> {
    println!("Relay console started. Enter a command, 'help' for the list or 'exit' to quit.");
    let mut commands_history: Vec<String> = Vec::new();
    let _raw = RawMode::enable()?;

    loop {
        let Some(input) = read_line(&commands_history)? else {
            continue;
        };
        if !input.trim().is_empty() {
            commands_history.push(input.clone());
        }

        let args: Vec<&str> = input.split_whitespace().collect();
        match args.as_slice() {
            ["start", credentials, target, messages, rest @ ..] => {
                let loaded = StartInputs::load(
                    Path::new(credentials),
                    target,
                    Path::new(messages),
                    rest.first().copied(),
                    config.default_interval(),
                    manager.sink(),
                );
                let started = match loaded {
                    Ok(inputs) => manager.start(
                        inputs.credentials,
                        &inputs.target,
                        inputs.messages,
                        inputs.interval,
                    ),
                    Err(e) => {
                        manager.sink().error(None, format!("Start rejected: {e}."));
                        Err(e)
                    }
                };
                match started {
                    Ok(id) => {
                        println!("\rCreated task with ID: {}", id);
                        println!("\rUse `list` to check on it or `stop {}` to end it", id);
                    }
                    Err(e) => println!("\rStart rejected: {}", e),
                }
            }
            ["start", ..] => println!("\rUsage: {}", HELP[0]),
            ["stop", id] => {
                let id = TaskId::from(*id);
                if manager.stop_one(&id) {
                    println!("\rTask {} stopped", id);
                } else {
                    println!("\rNo active task with ID {}", id);
                }
            }
            ["stop"] => println!("\rTask ID must be specified."),
            ["stopall"] => {
                let stopped = manager.stop_all();
                println!("\rStopped {} task(s)", stopped);
            }
            ["list"] => print_tasks(manager),
            ["logs"] => {
                for event in manager.sink().all() {
                    println!("\r{}", event);
                }
            }
            ["watch", flags @ ..] => {
                let history = flags.contains(&"all");
                let json = flags.contains(&"json");
                watch(publisher, config, history, json)?;
            }
            ["help"] => {
                for line in HELP {
                    println!("\r  {}", line);
                }
            }
            ["exit"] => {
                println!("\rStopping tasks and exiting...");
                manager.stop_all();
                break;
            }
            [cmd, ..] => println!("\rUnknown command: {}. Type 'help' for the list.", cmd),
            [] => continue,
        }
    }
    Ok(())
}

/// Reads one command with Up/Down history. `None` when the line was abandoned.
fn read_line(commands_history: &[String]) -> io::Result<Option<String>> {
    print!("\r>>> ");
    io::stdout().flush()?;

    let mut history_index = commands_history.len();
    let mut input = String::new();
    loop {
        let Event::Key(key_event) = event::read()? else {
            continue;
        };
        if key_event.kind != KeyEventKind::Press {
            continue;
        }
        match key_event.code {
            KeyCode::Enter => {
                println!("\r");
                return Ok(Some(input));
            }
            KeyCode::Esc => {
                println!("\r");
                return Ok(None);
            }
            KeyCode::Up => {
                if history_index > 0 {
                    history_index -= 1;
                }
                if let Some(command) = commands_history.get(history_index) {
                    input = command.clone();
                    redraw(&input)?;
                }
            }
            KeyCode::Down => {
                if history_index < commands_history.len() {
                    history_index += 1;
                }
                input = commands_history
                    .get(history_index)
                    .cloned()
                    .unwrap_or_default();
                redraw(&input)?;
            }
            KeyCode::Char(c) => {
                input.push(c);
                print!("{}", c);
                io::stdout().flush()?;
            }
            KeyCode::Backspace => {
                input.pop();
                redraw(&input)?;
            }
            _ => {}
        }
    }
}

fn redraw(input: &str) -> io::Result<()> {
    execute!(
        io::stdout(),
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::CurrentLine)
    )?;
    print!("\r>>> {}", input);
    io::stdout().flush()
}

fn print_tasks(manager: &JobManager) {
    let tasks = manager.list();
    if tasks.is_empty() {
        println!("\rNo active tasks");
        return;
    }
    println!("\r\tTask list:");
    println!(
        "\r{:<8} {:<10} {:<20} {:>5} {:>5} {:>8} {:>9} {:<19}",
        "ID", "Status", "Target", "Creds", "Msgs", "Every", "Sent/Fail", "Started"
    );
    println!("\r{}", "-".repeat(92));
    for task in tasks {
        println!(
            "\r{:<8} {:<10} {:<20} {:>5} {:>5} {:>7.1}s {:>4}/{:<4} {}",
            task.id.as_str(),
            format!("{:?}", task.status),
            task.target,
            task.credential_count,
            task.message_count,
            task.interval.as_secs_f64(),
            task.attempts.saturating_sub(task.failures),
            task.failures,
            task.started_at.format("%Y-%m-%d %H:%M:%S"),
        );
        if let Some(reason) = &task.last_error {
            println!("\r{:<8} last error: {}", "", reason);
        }
    }
}

fn watch(publisher: &StreamPublisher, config: &Config, history: bool, json: bool) -> io::Result<()> {
    let subscription = if history {
        publisher.subscribe_with_history()
    } else {
        publisher.subscribe()
    };
    let feed = publisher.feed(subscription)?;
    println!("\rWatching the live console, press any key to stop.");

    loop {
        for event in feed.try_iter() {
            if json {
                print!("{}", sse_frame(&event).replace('\n', "\r\n"));
            } else {
                println!("\r{}", event);
            }
        }
        io::stdout().flush()?;

        if event::poll(config.stream_poll_interval())? {
            if let Event::Key(key_event) = event::read()? {
                if key_event.kind == KeyEventKind::Press {
                    break;
                }
            }
        }
    }
    println!("\rStopped watching.");
    Ok(())
}
