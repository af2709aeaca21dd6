use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use rollcall_core::Embedding;
use rollcall_store::coordinator::today;
use rollcall_store::{AttendanceRecord, Store};

mod config;
mod engine;

use config::Config;
use engine::{spawn_engine, EngineHandle, EngineSettings};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance tracker")]
struct Cli {
    /// Data directory (overrides ROLLCALL_DATA_DIR and the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, list, rename or delete classes
    Class {
        #[command(subcommand)]
        action: ClassCommand,
    },
    /// Enroll, remove, delete or list students
    Student {
        #[command(subcommand)]
        action: StudentCommand,
    },
    /// Mark a student present today, bypassing recognition
    Mark {
        #[arg(short, long)]
        class: String,
        student_id: String,
    },
    /// Remove a recorded mark
    Unmark {
        #[arg(short, long)]
        class: String,
        #[arg(long)]
        roll: String,
        #[arg(long)]
        name: String,
        /// Record timestamp in milliseconds, as shown by `records`
        #[arg(long)]
        timestamp: i64,
        /// Day of the record (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show the records of one day
    Records {
        #[arg(short, long)]
        class: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Refresh the master ledger and print its path
    Ledger {
        #[arg(short, long)]
        class: String,
        /// Recompute from every daily record instead of today only
        #[arg(long)]
        rebuild: bool,
        /// Print the sheet instead of its path
        #[arg(long)]
        print: bool,
    },
    /// Recognize embeddings, one JSON array per line
    Recognize {
        #[arg(short, long)]
        class: String,
        /// Input file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Only report matches; do not mark
        #[arg(long)]
        manual: bool,
        /// Leave this student out of matching (repeatable)
        #[arg(long = "skip", value_name = "STUDENT_ID")]
        skip: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ClassCommand {
    /// Create a class
    Create {
        name: String,
        #[arg(long, default_value = "")]
        subject: String,
    },
    /// List classes
    List,
    /// Change a class's name and subject
    Rename {
        id: String,
        name: String,
        #[arg(long, default_value = "")]
        subject: String,
    },
    /// Delete a class and everything enrolled in it
    Delete { id: String },
}

#[derive(Subcommand)]
enum StudentCommand {
    /// Enroll or edit a student
    Enroll {
        #[arg(short, long)]
        class: String,
        #[arg(long)]
        roll: String,
        #[arg(long)]
        name: String,
        /// JSON file holding an array of embedding arrays
        #[arg(long)]
        embeddings: Option<PathBuf>,
        /// Keep this id instead of deriving one (edit an existing student)
        #[arg(long)]
        id: Option<String>,
    },
    /// Remove a student from a class
    Remove {
        #[arg(short, long)]
        class: String,
        student_id: String,
    },
    /// Delete a student: enrollment, embeddings and record
    Delete {
        #[arg(short, long)]
        class: String,
        student_id: String,
    },
    /// List students of a class
    List {
        #[arg(short, long)]
        class: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.data_dir);
    let store = Store::open(&config.data_dir)
        .with_context(|| format!("opening data dir {}", config.data_dir.display()))?;

    match cli.command {
        Commands::Class { action } => run_class(&store, action)?,
        Commands::Student { action } => run_student(&store, action)?,
        Commands::Mark { class, student_id } => {
            let engine = start_engine(&store, &config, &class).await?;
            let outcome = engine.mark_manually(&student_id).await?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        Commands::Unmark {
            class,
            roll,
            name,
            timestamp,
            date,
        } => {
            let date = date.unwrap_or_else(today);
            let record = AttendanceRecord {
                roll,
                name,
                timestamp,
                ..AttendanceRecord::present("", "", 0, "", &class)
            };
            if store.coordinator().remove_record(&class, date, &record)? {
                println!("removed");
            } else {
                println!("no matching record");
            }
        }
        Commands::Records { class, date } => {
            let records = store.coordinator().records_for(&class, date.unwrap_or_else(today));
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Ledger {
            class,
            rebuild,
            print,
        } => {
            let path = if rebuild {
                let dates = store.ledger.rebuild(&class)?;
                tracing::info!(dates, "ledger rebuilt");
                store.ledger.ledger_path(&class)
            } else {
                store.coordinator().export_ledger(&class)
            };
            if print {
                print!("{}", std::fs::read_to_string(&path)?);
            } else {
                println!("{}", path.display());
            }
        }
        Commands::Recognize {
            class,
            input,
            manual,
            skip,
        } => {
            let engine = start_engine(&store, &config, &class).await?;
            if manual {
                engine.set_auto_mark(false).await?;
            }
            for student_id in &skip {
                if !engine.forget(student_id).await? {
                    tracing::warn!(student_id = %student_id, "not loaded; nothing to skip");
                }
            }
            run_recognize(&engine, input.as_deref()).await?;
        }
    }

    Ok(())
}

fn run_class(store: &Store, action: ClassCommand) -> Result<()> {
    match action {
        ClassCommand::Create { name, subject } => {
            let class = store.classes.create(&name, &subject)?;
            println!("{}", class.id);
        }
        ClassCommand::List => {
            for class in store.classes.list() {
                println!(
                    "{}\t{}\t{}\t{} students",
                    class.id,
                    class.name,
                    class.subject,
                    class.student_ids.len()
                );
            }
        }
        ClassCommand::Rename { id, name, subject } => {
            if !store.roster().rename_class(&id, &name, &subject)? {
                bail!("unknown class: {id}");
            }
        }
        ClassCommand::Delete { id } => match store.roster().delete_class(&id)? {
            Some(class) => println!("deleted {} ({} students)", class.name, class.student_ids.len()),
            None => bail!("unknown class: {id}"),
        },
    }
    Ok(())
}

fn run_student(store: &Store, action: StudentCommand) -> Result<()> {
    match action {
        StudentCommand::Enroll {
            class,
            roll,
            name,
            embeddings,
            id,
        } => {
            let samples = match embeddings {
                Some(path) => read_embeddings(&path)?,
                None => Vec::new(),
            };
            let student = store
                .roster()
                .enroll(&class, &roll, &name, &samples, id.as_deref())?;
            println!("{}", student.id);
        }
        StudentCommand::Remove { class, student_id } => {
            if !store.roster().remove_from_class(&class, &student_id)? {
                bail!("{student_id} is not enrolled in {class}");
            }
        }
        StudentCommand::Delete { class, student_id } => {
            if !store.roster().delete_student(&class, &student_id)? {
                bail!("unknown student: {student_id}");
            }
        }
        StudentCommand::List { class } => {
            for student in store.roster().students(&class) {
                println!("{}\t{}\t{}", student.id, student.roll, student.name);
            }
        }
    }
    Ok(())
}

fn read_embeddings(path: &Path) -> Result<Vec<Embedding>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let samples: Vec<Embedding> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not an array of embeddings", path.display()))?;
    for (i, sample) in samples.iter().enumerate() {
        sample
            .validate()
            .with_context(|| format!("sample {i} in {}", path.display()))?;
    }
    Ok(samples)
}

async fn start_engine(store: &Store, config: &Config, class_id: &str) -> Result<EngineHandle> {
    if store.classes.get(class_id).is_none() {
        bail!("unknown class: {class_id}");
    }
    let engine = spawn_engine(
        store.clone(),
        EngineSettings {
            similarity_threshold: config.similarity_threshold,
            required_confirmations: config.required_confirmations,
            cooldown: config.cooldown(),
            auto_mark: config.auto_mark,
        },
    )?;
    let loaded = engine.switch_class(class_id).await?;
    tracing::info!(class_id, students = loaded, "engine ready");
    Ok(engine)
}

async fn run_recognize(engine: &EngineHandle, input: Option<&Path>) -> Result<()> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(std::io::BufReader::new(
            std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(std::io::stdin().lock()),
    };

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let embedding = match Embedding::from_json(&line) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "skipping malformed embedding");
                continue;
            }
        };
        let outcome = engine.recognize(embedding).await?;
        println!("{}", serde_json::to_string(&outcome)?);
    }
    Ok(())
}
