use eframe::egui;
use poll_promise::Promise;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::{Engine, Reply};
use crate::error::GenerationError;
use crate::message::ChatMessage;

const WELCOME_MESSAGE: &str = "Hi. I'm powered by Gemini. Write a message and I'll reply.";

pub struct ChatApp {
    pub engine: Engine,
    pub runtime: Handle,
    pub input: String,
    pub chat_history: Vec<ChatMessage>,
    pub pending_response: Option<Promise<Result<Reply, GenerationError>>>,
    pub cancel_token: Option<CancellationToken>,
    pub last_model: Option<String>,
    pub error_message: Option<String>,
    pub show_settings: bool,
    pub available_models: Vec<String>,
    pub pending_models: Option<Promise<Vec<String>>>,
    pub confirm_close: bool,
    pub allow_close: bool,
}

impl ChatApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, engine: Engine, runtime: Handle) -> Self {
        info!(model = %engine.config().preferred_model, "Chat window ready");
        Self {
            engine,
            runtime,
            input: String::new(),
            chat_history: vec![ChatMessage::assistant(WELCOME_MESSAGE)],
            pending_response: None,
            cancel_token: None,
            last_model: None,
            error_message: None,
            show_settings: false,
            available_models: Vec::new(),
            pending_models: None,
            confirm_close: false,
            allow_close: false,
        }
    }

    pub fn is_sending(&self) -> bool {
        self.pending_response.is_some()
    }

    pub fn refresh_models(&mut self) {
        if self.pending_models.is_some() {
            return;
        }

        let engine = self.engine.clone();
        let handle = self.runtime.clone();
        self.pending_models = Some(Promise::spawn_thread("list_models", move || {
            handle.block_on(async move { engine.discover_models().await })
        }));
    }

    pub fn send_message(&mut self) {
        let content = self.input.trim().to_string();
        if content.is_empty() || self.is_sending() {
            return;
        }

        self.input.clear();
        self.error_message = None;
        self.chat_history.push(ChatMessage::user(content));

        let engine = self.engine.clone();
        let history = self.chat_history.clone();
        let handle = self.runtime.clone();
        let cancel = CancellationToken::new();
        self.cancel_token = Some(cancel.clone());

        self.pending_response = Some(Promise::spawn_thread("llm_response", move || {
            handle.block_on(async move { engine.send_message(&history, &cancel).await })
        }));
    }

    pub fn stop_generation(&mut self) {
        if let Some(cancel) = &self.cancel_token {
            cancel.cancel();
        }
    }

    pub fn clear_chat(&mut self) {
        self.stop_generation();
        self.chat_history = vec![ChatMessage::assistant(WELCOME_MESSAGE)];
        self.input.clear();
        self.pending_response = None;
        self.cancel_token = None;
        self.last_model = None;
        self.error_message = None;
    }

    pub fn process_response(&mut self, ctx: &egui::Context) {
        let Some(promise) = self.pending_response.take() else {
            return;
        };

        let result = match promise.try_take() {
            Ok(result) => result,
            Err(promise) => {
                self.pending_response = Some(promise);
                return;
            }
        };

        match result {
            Ok(reply) => {
                self.chat_history.push(ChatMessage::assistant(reply.text));
                self.last_model = Some(reply.model_used);
            }
            Err(GenerationError::Cancelled) => {
                info!("Turn cancelled by user");
                self.chat_history.push(ChatMessage::system("Request cancelled."));
            }
            Err(err) => {
                error!(error = %err, tried = ?err.tried(), "Turn failed");
                self.error_message = Some(err.to_string());
            }
        }
        self.cancel_token = None;
        ctx.request_repaint();
    }

    pub fn process_models(&mut self) {
        let Some(promise) = self.pending_models.take() else {
            return;
        };

        match promise.try_take() {
            Ok(models) if models.is_empty() => {
                self.error_message = Some("No generation-capable models found.".to_string());
            }
            Ok(models) => self.available_models = models,
            Err(promise) => self.pending_models = Some(promise),
        }
    }
}
