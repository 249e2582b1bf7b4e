use std::cell::{Cell, RefCell};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use theory_reader::assistant::{run_turn, GeminiClient, Role, TurnOutcome};
use theory_reader::illustration::{GeminiImageClient, IllustrationState};
use theory_reader::notation::{compile, RenderOptions};
use theory_reader::playback::{HighlightSync, PcmBackend, SilentBackend, SynthBackend, Transport};
use theory_reader::reader::{load_illustrations, PageBlock, Reader};
use theory_reader::transcript::TranscriptBlock;
use theory_reader::widget::{WidgetBody, WidgetView};
use theory_reader::{Config, Curriculum};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: theory-reader [--config <file.yaml>] <command>

Commands:
  chapters                       List the parts and chapters of the book
  show <chapter> [svg-dir]       Print a chapter, optionally writing its scores as SVG
  render <input.abc> [out.svg]   Draw a score as SVG
  play <input.abc> [out.pcm]     Play a score, following the highlighted notes
  ask <chapter> <question...>    Ask the tutor about a chapter";

fn main() {
    let mut args: Vec<String> = env::args().skip(1).collect();

    let mut config_path: Option<PathBuf> = None;
    if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            eprintln!("{}", USAGE);
            process::exit(1);
        }
        config_path = Some(PathBuf::from(args.remove(1)));
        args.remove(0);
    }

    if args.is_empty() {
        eprintln!("{}", USAGE);
        process::exit(1);
    }

    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            process::exit(1);
        }
    };

    let result = match args[0].as_str() {
        "chapters" => list_chapters(),
        "show" if args.len() >= 2 => runtime.block_on(show(&config, &args[1], args.get(2).map(Path::new))),
        "render" if args.len() >= 2 => render(&args[1], args.get(2).map(Path::new)),
        "play" if args.len() >= 2 => runtime.block_on(play(&config, &args[1], args.get(2).map(Path::new))),
        "ask" if args.len() >= 3 => runtime.block_on(ask(&config, &args[1], &args[2..].join(" "))),
        _ => {
            eprintln!("{}", USAGE);
            process::exit(1);
        }
    };

    if let Err(message) = result {
        eprintln!("Error: {}", message);
        process::exit(1);
    }
}

fn load_book() -> Result<Arc<Curriculum>, String> {
    Curriculum::builtin().map(Arc::new).map_err(|e| e.to_string())
}

fn open_reader(config: &Config, chapter: &str, backend: Box<dyn SynthBackend>) -> Result<Reader, String> {
    let config = Config {
        start_chapter: Some(chapter.to_string()),
        ..config.clone()
    };
    Reader::new(load_book()?, &config, backend).map_err(|e| e.to_string())
}

fn read_source(path: &str) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("reading '{}': {}", path, e))
}

fn list_chapters() -> Result<(), String> {
    let book = load_book()?;
    println!("{}", book.title);
    for part in &book.parts {
        println!("\n{}", part.title);
        for chapter in &part.chapters {
            println!("  {:<12} {}", chapter.id, chapter.title);
        }
    }
    Ok(())
}

async fn show(config: &Config, chapter: &str, svg_dir: Option<&Path>) -> Result<(), String> {
    let reader = RefCell::new(open_reader(config, chapter, Box::new(SilentBackend))?);

    if config.images.enabled {
        let images = GeminiImageClient::new(&config.assistant, &config.images);
        load_illustrations(&reader, &images).await;
    }

    let reader = reader.into_inner();
    if let (Some(part), Some(chapter)) = (reader.part(), reader.chapter()) {
        println!("{}\n# {}\n", part.title, chapter.title);
    }

    for block in reader.blocks() {
        match block {
            PageBlock::Heading { level, text } => println!("{} {}\n", "#".repeat(*level as usize + 1), text),
            PageBlock::Paragraph(text) => println!("{}\n", text),
            PageBlock::List(items) => {
                for item in items {
                    println!("  • {}", item);
                }
                println!();
            }
            PageBlock::Callout { kind, content } => println!("{} {}: {}\n", kind.icon(), kind.title(), content),
            PageBlock::Notation { widget, caption } => {
                print_widget(&widget.view());
                if let Some(caption) = caption {
                    println!("  {}", caption);
                }
                println!();
                if let (Some(dir), Some(svg)) = (svg_dir, widget.svg()) {
                    let path = dir.join(format!("{}.svg", widget.id()));
                    fs::write(&path, svg).map_err(|e| format!("writing '{}': {}", path.display(), e))?;
                    eprintln!("Wrote {}", path.display());
                }
            }
            PageBlock::Image(illustration) => {
                match (&illustration.state, illustration.placeholder()) {
                    (IllustrationState::Ready { data_uri }, _) => println!("[image: {} bytes]", data_uri.len()),
                    (_, Some(placeholder)) => println!("[{}]", placeholder),
                    _ => {}
                }
                println!("  {}\n", illustration.caption);
            }
        }
    }
    Ok(())
}

fn print_widget(view: &WidgetView) {
    match &view.body {
        WidgetBody::Score { .. } => println!("[♪ score {}]", view.id),
        WidgetBody::Error { message } => println!("[notation error: {}]", message),
        WidgetBody::Empty => {}
    }
}

fn render(input: &str, output: Option<&Path>) -> Result<(), String> {
    let source = read_source(input)?;
    let svg = theory_reader::render_svg(&source, &RenderOptions::full(), "score")
        .map_err(|e| format!("Compilation error: {}", e))?;

    match output {
        Some(path) => {
            fs::write(path, &svg).map_err(|e| format!("writing '{}': {}", path.display(), e))?;
            eprintln!("Wrote SVG to {}", path.display());
        }
        None => println!("{}", svg),
    }
    Ok(())
}

async fn play(config: &Config, input: &str, output: Option<&Path>) -> Result<(), String> {
    let source = read_source(input)?;
    let mut score = compile(&source, &RenderOptions::full()).map_err(|e| format!("Compilation error: {}", e))?;

    let backend = PcmBackend::new(config.playback.sample_rate);
    if let Some(path) = output {
        let samples = backend.render(&score.audio).map_err(|e| e.to_string())?;
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        fs::write(path, bytes).map_err(|e| format!("writing '{}': {}", path.display(), e))?;
        eprintln!(
            "Wrote {} samples (f32 LE mono, {} Hz) to {}",
            samples.len(),
            config.playback.sample_rate,
            path.display()
        );
    }

    let synth = backend.prepare(&score.audio).ok();
    let mut transport = Transport::new(Arc::new(score.audio.clone()), synth);
    let mut sync = HighlightSync::new();
    let period = Duration::from_millis(config.playback.tick_millis.max(1));
    let mut interval = tokio::time::interval(period);

    println!("Playing {:.2}s at {} bpm", score.audio.total_seconds, score.audio.tempo);
    transport.start();
    while transport.status() == theory_reader::PlaybackStatus::Playing {
        interval.tick().await;
        for event in transport.tick(period) {
            sync.apply(&mut score.visual, &event);
            let active: Vec<String> = event.active.iter().map(ToString::to_string).collect();
            println!("{:>7.2}s  {}", event.time, active.join(" "));
        }
    }
    Ok(())
}

async fn ask(config: &Config, chapter: &str, question: &str) -> Result<(), String> {
    let mut reader = open_reader(config, chapter, Box::new(SilentBackend))?;
    let client = GeminiClient::new(&config.assistant);
    let panel = reader.panel();
    panel.borrow_mut().set_input(question);

    let done = Cell::new(false);
    let turn = async {
        let outcome = run_turn(&panel, &client).await;
        done.set(true);
        outcome
    };
    let printer = async {
        let mut interval = tokio::time::interval(Duration::from_millis(config.playback.tick_millis.max(1)));
        let mut printed: Option<(uuid::Uuid, usize)> = None;
        loop {
            interval.tick().await;
            let finished = done.get();
            if let Some(message) = panel.borrow().messages().last().filter(|m| m.role == Role::Assistant) {
                let from = match printed {
                    Some((id, n)) if id == message.id => n,
                    Some(_) => {
                        println!();
                        0
                    }
                    None => 0,
                };
                print!("{}", &message.text[from..]);
                let _ = std::io::stdout().flush();
                printed = Some((message.id, message.text.len()));
            }
            if finished {
                println!();
                break;
            }
        }
    };
    let (outcome, ()) = tokio::join!(turn, printer);

    for entry in reader.render_transcript() {
        if entry.role != Role::Assistant {
            continue;
        }
        for block in &entry.blocks {
            if let TranscriptBlock::Notation(view) = block {
                print_widget(view);
            }
        }
    }

    match outcome {
        TurnOutcome::Failed => Err("the tutor could not be reached".to_string()),
        _ => Ok(()),
    }
}
