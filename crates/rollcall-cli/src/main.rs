use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add an enrollment image for a student and retrain
    Enroll {
        user: String,
        /// Image file (JPEG or PNG)
        image: PathBuf,
        /// Label for this image (e.g., "front", "glasses")
        #[arg(short, long, default_value = "face")]
        label: String,
    },
    /// Mark attendance from a captured frame
    Mark {
        user: String,
        frame: PathBuf,
        /// Attendance date, YYYY-MM-DD (defaults to today)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Mark attendance without a frame
    Manual {
        user: String,
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Retrain the model from the gallery
    Train,
    /// List enrolled identities
    List,
    /// List enrollment images of a student
    Images { user: String },
    /// Save one enrollment image to a file
    Image {
        user: String,
        filename: String,
        /// Destination (defaults to the image's filename)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove every enrollment image of a student and retrain
    Remove { user: String },
    /// Print attendance records
    Report {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Show daemon status
    Status,
}

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn enroll(&self, user: &str, label: &str, image: &[u8]) -> zbus::Result<String>;
    async fn mark_attendance(&self, user: &str, frame: &[u8], date: &str)
        -> zbus::Result<String>;
    async fn mark_manual(&self, user: &str, date: &str) -> zbus::Result<String>;
    async fn train(&self) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn list_images(&self, user: &str) -> zbus::Result<String>;
    async fn get_image(&self, user: &str, filename: &str) -> zbus::Result<Vec<u8>>;
    async fn remove_identity(&self, user: &str) -> zbus::Result<String>;
    async fn report(&self, from: &str, to: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;

    let response = match cli.command {
        Commands::Enroll { user, image, label } => {
            let bytes = read(&image)?;
            proxy.enroll(&user, &label, &bytes).await?
        }
        Commands::Mark { user, frame, date } => {
            let bytes = read(&frame)?;
            proxy
                .mark_attendance(&user, &bytes, date.as_deref().unwrap_or(""))
                .await?
        }
        Commands::Manual { user, date } => {
            proxy
                .mark_manual(&user, date.as_deref().unwrap_or(""))
                .await?
        }
        Commands::Train => proxy.train().await?,
        Commands::List => proxy.list_identities().await?,
        Commands::Images { user } => proxy.list_images(&user).await?,
        Commands::Image {
            user,
            filename,
            output,
        } => {
            let bytes = proxy.get_image(&user, &filename).await?;
            let output = output.unwrap_or_else(|| PathBuf::from(&filename));
            std::fs::write(&output, &bytes)
                .with_context(|| format!("writing {}", output.display()))?;
            tracing::debug!(bytes = bytes.len(), path = %output.display(), "image saved");
            println!("{}", output.display());
            return Ok(());
        }
        Commands::Remove { user } => proxy.remove_identity(&user).await?,
        Commands::Report { from, to } => {
            proxy
                .report(from.as_deref().unwrap_or(""), to.as_deref().unwrap_or(""))
                .await?
        }
        Commands::Status => proxy.status().await?,
    };

    let value: serde_json::Value =
        serde_json::from_str(&response).context("daemon sent malformed JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);

    if value["ok"] == false {
        std::process::exit(1);
    }
    Ok(())
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}
