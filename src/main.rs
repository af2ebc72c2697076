use std::{
    env,
    fmt,
    fs::{self, File},
    io::{self, stderr, Stderr, Write},
    path::{Path, PathBuf},
    process,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, Level, log_enabled};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use progresslib::{ProgressBar, ProgressDrawMode};
use ipswlib::{
    catalog::CatalogClientBuilder,
    download::{DownloadClientBuilder, DownloadError},
    mirror::{file_name_for_url, to_non_secure_mirror},
    sniff,
};

const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Download `url` to `path`, streaming the response body directly to disk
/// while a progress bar tracks the bytes received. After a transport-clean
/// finish, the saved content is validated: the reported total size must be
/// known and non-zero, and the first bytes of the file must not look like an
/// HTML error page. On every failure path the partially written file is
/// deleted before returning, so a failed attempt leaves nothing behind for
/// the next one.
async fn download_to_file(
    client_builder: &DownloadClientBuilder,
    url: &str,
    path: &Path,
) -> Result<(), DownloadError> {
    let client = client_builder.build()?;
    let (total, mut stream) = client.download(url).await?;

    debug!("Saving {} to {:?} (expected size: {:?})", url, path, total);

    let mut bar = create_progress_bar(total);

    let received: Result<(), DownloadError> = async {
        let mut file = File::create(path)?;

        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data)?;
            bar.advance(data.len() as u64)?;
        }

        file.flush()?;

        Ok(())
    }
    .await;
    // The write handle is closed here; validation reads the file back.

    // Dropping the bar draws the final frame and releases the terminal
    drop(bar);

    let validated = received.and_then(|_| {
        match total {
            Some(size) if size > 0 => {}
            _ => return Err(DownloadError::EmptyOrUnknownSize),
        }

        if sniff::file_looks_like_html(path)? {
            return Err(DownloadError::HtmlErrorPage);
        }

        Ok(())
    });

    if let Err(e) = validated {
        // Keep the download error even if the unlink itself fails
        if let Err(cleanup) = delete_if_exists(path) {
            debug!("Could not delete {:?}: {}", path, cleanup);
        }

        return Err(e);
    }

    Ok(())
}

/// Create a new progress bar for a download of the given expected size. The
/// progress bar is not immediately rendered.
fn create_progress_bar(len: Option<u64>) -> ProgressBar<Stderr> {
    let mut bar = ProgressBar::new(stderr(), len);
    if log_enabled!(Level::Debug) {
        // The escape sequences for the interactive progress bar would clobber
        // log messages.
        bar.set_mode(Some(ProgressDrawMode::Append));
    }

    bar
}

/// Delete a file, but don't error out if the path doesn't exist.
fn delete_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Ask whether the existing file at `path` should be overwritten. Anything
/// other than an explicit yes keeps the file.
fn confirm_overwrite(path: &Path) -> Result<bool> {
    eprint!("{:?} already exists. Overwrite? [y/N] ", path);
    stderr().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)
        .context("Could not read confirmation answer")?;

    Ok(is_affirmative(&answer))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim(), "y" | "Y" | "yes" | "Yes" | "YES")
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => f.write_str("debug"),
            Self::Trace => f.write_str("trace"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Config {
    catalog_url: Option<String>,
    timeout: Option<u64>,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push(format!("{}.conf", PKG_NAME));
        p
    })
}

fn load_config_file(user_path: Option<&Path>) -> Result<Option<Config>> {
    let default_path = default_config_path();
    let path = user_path.or_else(|| default_path.as_deref());

    match path {
        Some(p) => {
            let file = match File::open(p) {
                Ok(f) => f,
                Err(e) => {
                    return if e.kind() == io::ErrorKind::NotFound {
                        Ok(None)
                    } else {
                        Err(e).context(format!("Could not open file: {:?}", p))
                    };
                }
            };

            let config = serde_json::from_reader(file)
                .context(format!("Could not parse config file: {:?}", p))?;

            Ok(Some(config))
        }
        None => Ok(None),
    }
}

/// A simple tool for downloading official firmware files for a device model
/// and OS version.
#[derive(Debug, Parser)]
#[command(author, version)]
struct Opts {
    /// Device's model identifier (eg. iPhone14,2)
    model: String,
    /// OS version to download (eg. 16.5)
    ios_version: String,
    /// Download from the non-secure mirror directly
    ///
    /// The catalog's download URLs point at the secure mirror. Passing this
    /// option rewrites the URL to the plain-HTTP mirror before the first
    /// attempt instead of only falling back to it.
    #[arg(long)]
    insecure: bool,
    /// Output path for the downloaded firmware
    ///
    /// By default, the output path is the final path segment of the resolved
    /// download URL, in the current directory.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Allow overwriting the output file if it exists
    ///
    /// By default, a confirmation prompt is shown when the output file
    /// already exists. Passing this option skips the prompt.
    #[arg(short, long)]
    force: bool,
    /// Network timeout in seconds
    ///
    /// By default, no timeout is applied and an unresponsive server will
    /// stall the run. The timeout bounds the catalog request and the time
    /// spent connecting to a mirror; it never bounds the transfer of the
    /// firmware body itself.
    #[arg(long)]
    timeout: Option<u64>,
    /// Catalog URL
    ///
    /// If unspecified, the URL is loaded from the `IPSWDL_CATALOG_URL`
    /// environment variable, followed by the `catalog_url` config file
    /// variable, followed by the built-in default.
    #[arg(long, env = "IPSWDL_CATALOG_URL")]
    catalog_url: Option<String>,
    /// Ignore TLS validation for HTTPS connections
    ///
    /// By default, all HTTPS connections (to the catalog and to the secure
    /// mirror) will validate the TLS certificate against the system's CA
    /// trust store.
    #[arg(long)]
    ignore_tls_validation: bool,
    /// Set logging verbosity
    ///
    /// By default, no log messages are printed out. If set to 'debug', log
    /// messages of the implementation details (such as the resolved URLs and
    /// the fallback decisions) are printed out. If set to 'trace', messages
    /// from the HTTP stack are also printed out. This option overrides the
    /// RUST_LOG environment variable, which would otherwise be respected if
    /// this option was not passed.
    #[arg(long, value_enum)]
    loglevel: Option<LogLevel>,
    /// Config file path
    ///
    /// If unspecified, the default config file path is used. The config file
    /// can store the catalog URL and the network timeout to avoid passing
    /// them on every invocation.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();

    if let Some(l) = opts.loglevel {
        env::set_var("RUST_LOG", format!("{PKG_NAME}={l},ipswlib={l}"));
    }

    env_logger::init();

    debug!("Arguments: {:#?}", opts);

    let config = load_config_file(opts.config.as_deref())?;
    debug!("Config: {:#?}", config);

    let timeout = opts.timeout
        .or_else(|| config.as_ref().and_then(|c| c.timeout))
        .map(Duration::from_secs);
    let catalog_url = opts.catalog_url
        .clone()
        .or_else(|| config.as_ref().and_then(|c| c.catalog_url.clone()));

    let mut catalog_builder = CatalogClientBuilder::new()
        .timeout(timeout)
        .ignore_tls_validation(opts.ignore_tls_validation);
    if let Some(url) = catalog_url {
        catalog_builder = catalog_builder.catalog_url(url);
    }

    debug!("Fetching firmware catalog");

    let catalog = catalog_builder.build()
        .context("Could not initialize catalog client")?
        .fetch_catalog().await
        .context("Failed to fetch firmware catalog")?;

    debug!("Catalog contains {} records", catalog.len());

    let record = match catalog.resolve(&opts.model, &opts.ios_version) {
        Some(r) => r,
        None => {
            // A miss is an expected outcome, not an error with a backtrace
            eprintln!(
                "Model {} with iOS version {} is not supported.",
                opts.model, opts.ios_version,
            );
            process::exit(1);
        }
    };

    debug!("Resolved catalog record: {:#?}", record);

    let primary_url = if opts.insecure {
        to_non_secure_mirror(&record.download_link).into_owned()
    } else {
        record.download_link.clone()
    };

    let default_name = file_name_for_url(&primary_url)
        .ok_or_else(|| anyhow!("Download URL has no usable filename: {}", primary_url))?;
    let output_path = opts.output
        .clone()
        .unwrap_or_else(|| Path::new(default_name).to_owned());

    println!("Firmware info:");
    println!("- Model: {}", record.model);
    println!("- Version: {}", record.ios_version);
    println!("- URL: {}", primary_url);
    println!("- Output: {:?}", output_path);

    if output_path.exists() && !opts.force && !confirm_overwrite(&output_path)? {
        println!("Keeping existing file.");
        return Ok(());
    }

    let client_builder = DownloadClientBuilder::new()
        .connect_timeout(timeout)
        .ignore_tls_validation(opts.ignore_tls_validation);

    if let Err(e) = download_to_file(&client_builder, &primary_url, &output_path).await {
        eprintln!("Download failed: {}", e);

        let mirror_url = to_non_secure_mirror(&primary_url);
        println!("Retrying from fallback mirror: {}", mirror_url);

        download_to_file(&client_builder, &mirror_url, &output_path).await
            .context("Fallback download failed")?;
    }

    println!("Saved firmware to {:?}", output_path);

    Ok(())
}
