//! Duet 命令行
//!
//! 入口：初始化日志、创建 SessionController，提交问题后打印会话事件；
//! 讨论进行中可在标准输入键入 pause / resume / stop / quit。

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use duet::config::DiscussionMode;
use duet::core::{create_controller, spawn_command_loop, Command, Overrides};
use duet::discussion::{ApiKeyStatus, SessionEvent};
use duet::llm::ImagePart;
use duet::{observability, ProcessingState};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// 双方连续两步同意后结束
    AiDriven,
    /// 固定轮数后结束
    Fixed,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Two AI participants debate a question, then synthesise an answer", long_about = None)]
struct Args {
    /// Extra config file layered over config/default.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Termination policy (overrides discussion.mode)
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Turn count for the fixed policy (overrides discussion.fixed_turns)
    #[arg(long)]
    turns: Option<u32>,

    /// Print events as JSON lines
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Image file attached to the question (png / jpeg / webp / gif / heic)
    #[arg(long)]
    image: Option<PathBuf>,

    /// The question to discuss
    #[arg(required_unless_present = "image")]
    query: Vec<String>,
}

/// 读入 --image 指定的文件并编码
fn load_image(path: &Path) -> anyhow::Result<ImagePart> {
    let mime_type = ImagePart::mime_type_for(path)
        .with_context(|| format!("Unsupported image type: {}", path.display()))?;
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    Ok(ImagePart::from_bytes(mime_type, &bytes))
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_lowercase().as_str() {
        "pause" | "p" => Some(Command::Pause),
        "resume" | "r" => Some(Command::Resume),
        "stop" | "s" => Some(Command::Stop),
        "quit" | "q" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

fn print_event(event: &SessionEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to serialize event: {}", e),
        }
        return;
    }
    match event {
        SessionEvent::MessageAppended {
            speaker,
            text,
            elapsed_ms,
            ..
        } => match elapsed_ms {
            Some(ms) => println!("[{}] ({:.2}s)\n{}\n", speaker, *ms as f64 / 1000.0, text),
            None => println!("[{}] {}", speaker, text),
        },
        SessionEvent::NotepadUpdated { content } => {
            println!("--- notepad ---\n{}\n---------------", content)
        }
        SessionEvent::TurnAdvanced { turn } => println!("== turn {} ==", turn),
        SessionEvent::ProcessingStateChanged { state } => println!("(state: {})", state),
        SessionEvent::ApiKeyStatusChanged { status, message } => {
            if *status != ApiKeyStatus::Ok {
                eprintln!(
                    "API key problem ({:?}): {}",
                    status,
                    message.as_deref().unwrap_or("")
                );
            }
        }
        SessionEvent::DiscussionCompleted { turns } => {
            println!("Discussion finished after {} turn(s).", turns)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let args = Args::parse();

    let query = args.query.join(" ");
    let image = args.image.as_deref().map(load_image).transpose()?;
    if query.trim().is_empty() && image.is_none() {
        anyhow::bail!("query must not be empty");
    }

    let overrides = Overrides {
        mode: args.mode.map(|m| match m {
            ModeArg::AiDriven => DiscussionMode::AiDriven,
            ModeArg::Fixed => DiscussionMode::Fixed,
        }),
        fixed_turns: args.turns,
    };
    let (controller, mut events) =
        create_controller(args.config, overrides).context("Failed to create session controller")?;

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let command_loop = spawn_command_loop(controller, cmd_rx);
    cmd_tx
        .send(Command::Start { query, image })
        .context("Command loop closed")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event, args.json);
                // 完成、出错、stop 都会回到 idle
                if matches!(event, SessionEvent::ProcessingStateChanged { state: ProcessingState::Idle }) {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match parse_command(&line) {
                        Some(Command::Quit) => break,
                        Some(cmd) => {
                            let _ = cmd_tx.send(cmd);
                        }
                        None if line.trim().is_empty() => {}
                        None => eprintln!("unknown command '{}' (pause / resume / stop / quit)", line.trim()),
                    },
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        tracing::warn!("stdin read failed: {}", e);
                        stdin_open = false;
                    }
                }
            }
        }
    }

    let _ = cmd_tx.send(Command::Quit);
    command_loop.await.context("Command loop panicked")?;
    Ok(())
}
