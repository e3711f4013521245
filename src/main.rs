use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use story_generator::config::{Config, DEFAULT_CONFIG_PATH, MAX_CHAPTERS};
use story_generator::display::TerminalSink;
use story_generator::generation::GenerationPolicy;
use story_generator::llm;
use story_generator::setup::{self, RequestDraft};
use story_generator::state::{Genre, Tone};
use story_generator::story_log::{StoryLog, StoryLogError, EXPORT_MIME_TYPE};
use story_generator::workflow::StoryWorkflow;

#[derive(Parser)]
#[command(name = "story-generator", version, about = "Create custom stories with a language model")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a story (the default)
    Generate(GenerateArgs),
    /// Show previously generated stories
    History {
        /// Print the full story text instead of a preview
        #[arg(long)]
        full: bool,
    },
    /// Copy the story log to a directory as stories.csv
    Export {
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Args, Default)]
struct GenerateArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    character: Option<String>,
    #[arg(long)]
    genre: Option<Genre>,
    #[arg(long)]
    tone: Option<Tone>,
    /// Target length in words
    #[arg(long)]
    length: Option<usize>,
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_CHAPTERS)))]
    chapters: Option<u32>,
    /// Use defaults for anything not given instead of asking
    #[arg(long)]
    no_input: bool,
    /// Regenerate in growing chunks and show the text as it grows
    #[arg(long)]
    chunked: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let story_log = StoryLog::new(&config.story_log);

    match cli.command.unwrap_or(Command::Generate(GenerateArgs::default())) {
        Command::Generate(args) => generate(config, story_log, args).await,
        Command::History { full } => history(&story_log, full),
        Command::Export { out } => export(&story_log, out),
    }
}

async fn generate(config: Config, story_log: StoryLog, args: GenerateArgs) -> Result<()> {
    let draft = RequestDraft {
        title: args.title,
        character: args.character,
        genre: args.genre,
        tone: args.tone,
        length: args.length,
        chapters: args.chapters,
    };
    let request = if args.no_input || draft.is_complete() {
        draft.with_defaults(&config.input)
    } else {
        setup::collect_request(draft, &config.input)?
    };

    let provider = match llm::create_provider(&config).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error loading model: {:#}", e);
            eprintln!("Check the llm section of the config file.");
            return Err(e);
        }
    };

    let policy = if args.chunked {
        GenerationPolicy::ChunkedRegenerate {
            step: config.generation.chunk_step,
        }
    } else {
        GenerationPolicy::from(&config.generation)
    };

    let workflow = StoryWorkflow::new(provider, policy, story_log);
    let mut sink = TerminalSink::new();
    let records = workflow.run(&request, &mut sink).await?;

    println!(
        "\nDone: {} chapter(s) saved to {}. Run `story-generator history` to see earlier stories.",
        records.len(),
        workflow.story_log().path().display()
    );
    Ok(())
}

fn history(story_log: &StoryLog, full: bool) -> Result<()> {
    let records = match story_log.load_all() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error reading story log: {}", e);
            return Ok(());
        }
    };

    if records.is_empty() {
        println!("No stories yet.");
        return Ok(());
    }

    for record in &records {
        let chapter = record
            .chapter
            .map(|c| format!(" (chapter {})", c))
            .unwrap_or_default();
        println!(
            "[{}] {}{} - {}, {} / {}",
            record.timestamp, record.title, chapter, record.character, record.genre, record.tone
        );
        if full {
            println!("{}\n", record.text.trim());
        } else {
            let preview: String = record.text.chars().take(120).collect();
            println!("    {}", preview.replace('\n', " "));
        }
    }
    Ok(())
}

fn export(story_log: &StoryLog, out: PathBuf) -> Result<()> {
    if !story_log.exists() {
        println!("Nothing to export yet: {} does not exist.", story_log.path().display());
        return Ok(());
    }
    match story_log.export_to(&out) {
        Ok(dest) => {
            let size = std::fs::metadata(&dest)
                .with_context(|| format!("Failed to stat {}", dest.display()))?
                .len();
            println!("Exported {} ({}, {} bytes)", dest.display(), EXPORT_MIME_TYPE, size);
        }
        Err(StoryLogError::NotFound(path)) => {
            println!("Nothing to export yet: {} does not exist.", path.display());
        }
        Err(e) => eprintln!("Error exporting story log: {}", e),
    }
    Ok(())
}
