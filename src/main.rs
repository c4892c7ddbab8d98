#![cfg_attr(all(windows, not(debug_assertions)), windows_subsystem = "windows")]

use std::sync::Arc;

use anyhow::{Context, Result};
use eframe::egui;
use tracing_subscriber::EnvFilter;

mod chatapp;
mod chatapp_ui;
mod config;
mod engine;
mod error;
mod llmclient;
mod message;

use chatapp::ChatApp;
use config::Config;
use engine::Engine;
use llmclient::GeminiClient;

const DEFAULT_LOG_FILTER: &str = "gemini_chat=info";

fn log_filter(var: &str) -> EnvFilter {
    EnvFilter::try_from_env(var).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn main() -> Result<()> {
    // Values already in the environment win over .env; RUST_LOG may come from either
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(EnvFilter::DEFAULT_ENV))
        .with_target(true)
        .init();

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Err(err) if err.not_found() => {}
        Err(err) => tracing::warn!(error = %err, "Failed to read .env"),
    }

    let config = Config::from_env().context("Invalid configuration")?;
    tracing::info!(
        model = %config.preferred_model,
        api_version = %config.api_version,
        fallbacks = ?config.fallback_models,
        "Starting Gemini chat"
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let engine = Engine::new(Arc::new(GeminiClient::new(&config)), config);
    let handle = runtime.handle().clone();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_resizable(true),
        ..Default::default()
    };

    eframe::run_native(
        "Gemini Chat",
        options,
        Box::new(move |cc| Box::new(ChatApp::new(cc, engine, handle))),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run app: {}", e))
}
