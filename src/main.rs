use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use geopv::config::ClientConfig;
use geopv::controller::{ControllerSettings, JobController, Phase, ResultView, Snapshot};
use geopv::models::analysis::Rooftop;
use geopv::models::image::SelectedImage;
use geopv::services::artifacts::ArtifactStore;
use geopv::services::capture::{CaptureFetcher, CaptureListener};
use geopv::services::geocode::{maps_url, NominatimClient};
use geopv::services::job_service::HttpJobService;

#[derive(Parser, Debug)]
#[command(name = "geopv")]
#[command(about = "Solar rooftop potential analyzer client")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze an aerial image file.
    Analyze {
        #[arg(long)]
        image: PathBuf,
        /// Directory (or file) to copy the detection image to.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Wait for a screenshot from the map window, then analyze it.
    Capture {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print a satellite map link for a city, at the zoom the model expects.
    Locate {
        #[arg(long)]
        city: String,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries the analysis output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();
    let config = ClientConfig::from_env().expect("Failed to load configuration from environment");

    metrics::describe_counter!(
        "analysis_jobs_submitted_total",
        "Total analysis jobs accepted by the service"
    );
    metrics::describe_counter!(
        "analysis_jobs_completed_total",
        "Total analysis jobs resolved with a result"
    );
    metrics::describe_counter!(
        "analysis_jobs_failed_total",
        "Total analysis jobs that ended in failure"
    );
    metrics::describe_histogram!(
        "analysis_job_duration_seconds",
        "Time from submission to assembled result"
    );

    let code = match args.cmd {
        Command::Analyze { image, output } => analyze(&config, Some(&image), output.as_deref()).await,
        Command::Capture { output } => analyze(&config, None, output.as_deref()).await,
        Command::Locate { city } => locate(&config, &city).await,
    };

    std::process::exit(code);
}

async fn locate(config: &ClientConfig, city: &str) -> i32 {
    let client = NominatimClient::new(&config.nominatim_url).expect("Failed to build geocoding client");
    match client.locate(city).await {
        Ok(coordinates) => {
            println!("{}", maps_url(coordinates));
            println!("Take a screenshot of the area you want to analyze.");
            0
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

/// Run one analysis, from a file or from a capture when `image` is `None`.
async fn analyze(config: &ClientConfig, image: Option<&Path>, output: Option<&Path>) -> i32 {
    tracing::info!(api = %config.api_base_url, "Initializing analysis client");

    let service = HttpJobService::new(&config.api_base_url, config.request_timeout())
        .expect("Failed to initialize analysis service client");
    let artifacts = ArtifactStore::new(&config.artifact_dir).expect("Failed to create artifact directory");

    let (mut controller, handle) =
        JobController::new(Arc::new(service), artifacts, ControllerSettings::from(config));

    match image {
        Some(path) => {
            let selected = match SelectedImage::from_path(path).await {
                Ok(selected) => selected,
                Err(e) => {
                    eprintln!("Could not read {}: {e}", path.display());
                    return 1;
                }
            };
            let runner = tokio::spawn(controller.run());
            if handle.select_file(selected).await.is_err() {
                return 1;
            }
            let code = drive(&handle, output).await;
            handle.teardown().await;
            let _ = runner.await;
            code
        }
        None => {
            let mut fetcher = CaptureFetcher::new(reqwest::Client::new(), config.max_image_bytes);
            if let Some(dir) = &config.capture_dir {
                fetcher = fetcher.with_capture_dir(dir);
            }
            let bound = CaptureListener::bind(
                &config.capture_bind_addr,
                fetcher,
                &config.capture_allowed_origins,
                controller.capture_sender(),
            )
            .await;
            let listener = match bound {
                Ok(listener) => listener,
                Err(e) => {
                    eprintln!("{e}");
                    return 1;
                }
            };
            println!(
                "Waiting for a screenshot on http://{}/capture ...",
                listener.local_addr()
            );
            controller.attach_capture(listener);
            let runner = tokio::spawn(controller.run());

            let captured = handle
                .wait_for(|snapshot| snapshot.selected_image.is_some() || snapshot.message.is_some())
                .await;
            let code = match captured {
                Ok(Snapshot { selected_image: Some(name), .. }) => {
                    println!("Captured {name}");
                    drive(&handle, output).await
                }
                Ok(Snapshot { message, .. }) => {
                    eprintln!("{}", message.unwrap_or_default());
                    1
                }
                Err(e) => {
                    eprintln!("{}", e.user_message());
                    1
                }
            };
            handle.teardown().await;
            let _ = runner.await;
            code
        }
    }
}

/// Start the analysis and report progress until it settles.
async fn drive(handle: &geopv::controller::ControllerHandle, output: Option<&Path>) -> i32 {
    if let Err(e) = handle.start_analysis().await {
        eprintln!("{}", e.user_message());
        return 1;
    }

    let mut updates = handle.subscribe();
    let mut last_progress = String::new();
    loop {
        let snapshot = updates.borrow_and_update().clone();
        match snapshot.phase {
            Phase::Resolved | Phase::Failed => break,
            Phase::Polling => {
                if let Some(job) = &snapshot.job {
                    let progress = job.progress_message();
                    if progress != last_progress {
                        println!("{progress}");
                        last_progress = progress;
                    }
                }
            }
            _ => {}
        }
        if updates.changed().await.is_err() {
            eprintln!("The analysis session ended unexpectedly.");
            return 1;
        }
    }

    let snapshot = handle.current();
    match (&snapshot.phase, &snapshot.result) {
        (Phase::Resolved, Some(result)) => {
            print_result(result);
            if let Some(output) = output {
                if let Err(e) = copy_image(result, output).await {
                    eprintln!("Could not save the detection image: {e}");
                    return 1;
                }
            }
            0
        }
        _ => {
            eprintln!("{}", snapshot.message.unwrap_or_else(|| "Analysis failed".to_string()));
            1
        }
    }
}

fn print_result(result: &ResultView) {
    let analysis = &result.analysis;

    println!();
    println!("Solar Potential Overview");
    if let Some(coverage) = analysis.total_coverage_percentage {
        println!("  Total Rooftop Coverage: {coverage:.2}%");
    }
    if let Some(energy) = analysis.total_energy_potential {
        println!("  Total Energy Potential: {energy:.2} kWh/year");
    }

    if !analysis.rooftops.is_empty() {
        println!();
        println!("Individual Rooftop Details");
        for rooftop in &analysis.rooftops {
            println!("{}", rooftop_line(rooftop));
        }
    }

    println!();
    println!("Detailed Report");
    println!("{}", result.report);
}

fn rooftop_line(rooftop: &Rooftop) -> String {
    let mut line = format!(
        "  Rooftop {}: coverage {:.2}%, area {:.2} m², energy {:.2} kWh/year",
        rooftop.id, rooftop.percentage, rooftop.area_m2, rooftop.energy_potential_kwh_per_year
    );
    if let Some(panels) = rooftop.potential_panel_count {
        line.push_str(&format!(", {panels} panels"));
    }
    if let Some(co2) = rooftop.co2_saved_kg_per_year {
        line.push_str(&format!(", CO2 saved {co2:.2} kg/year"));
    }
    line
}

async fn copy_image(result: &ResultView, output: &Path) -> std::io::Result<()> {
    let target = if output.is_dir() {
        output.join(result.image_path.file_name().unwrap_or_default())
    } else {
        output.to_path_buf()
    };
    tokio::fs::copy(&result.image_path, &target).await?;
    println!("Detection image saved to {}", target.display());
    Ok(())
}
