use chrono::Local;
use eframe::egui;
use std::time::Duration;

use crate::chatapp::ChatApp;
use crate::message::{ChatMessage, Role};

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Request a repaint after a short delay (16ms = ~60 FPS)
        ctx.request_repaint_after(Duration::from_millis(16));

        self.process_response(ctx);
        self.process_models();
        self.handle_close_request(ctx);

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("☰").clicked() {
                    self.show_settings = !self.show_settings;
                    if self.show_settings && self.available_models.is_empty() {
                        self.refresh_models();
                    }
                }
                ui.label("Gemini Chat");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("New Chat").clicked() {
                        self.clear_chat();
                    }
                });
            });
        });

        if self.show_settings {
            self.show_settings_window(ctx);
        }

        egui::CentralPanel::default().show(ctx, |ui| self.render_chat_tab(ui));
    }
}

impl ChatApp {
    fn render_chat_tab(&mut self, ui: &mut egui::Ui) {
        let available_height = ui.available_height();
        let input_area_height = 120.0;

        ui.vertical(|ui| {
            egui::ScrollArea::vertical()
                .auto_shrink([false; 2])
                .stick_to_bottom(true)
                .max_height(available_height - input_area_height)
                .show(ui, |ui| {
                    self.render_chat_history(ui);
                    if self.is_sending() {
                        ui.horizontal(|ui| {
                            ui.spinner();
                            ui.label("Gemini is typing...");
                        });
                    }
                });

            ui.add_space(8.0);

            if let Some(error) = &self.error_message {
                ui.colored_label(egui::Color32::RED, error);
            }

            ui.group(|ui| {
                ui.set_min_height(input_area_height - 30.0);
                let busy = self.is_sending();

                ui.vertical(|ui| {
                    ui.add_enabled(
                        !busy,
                        egui::TextEdit::multiline(&mut self.input)
                            .hint_text("Type your message here... (Press Enter to send, Shift+Enter for new line)")
                            .desired_width(f32::INFINITY)
                            .desired_rows(3),
                    );

                    ui.horizontal(|ui| {
                        let enter = ui.input(|i| i.key_pressed(egui::Key::Enter) && !i.modifiers.shift);
                        if ui.add_enabled(!busy, egui::Button::new("Send")).clicked() || (enter && !busy) {
                            self.send_message();
                        }
                        if busy && ui.button("Stop").clicked() {
                            self.stop_generation();
                        }
                        if let Some(model) = &self.last_model {
                            ui.label(egui::RichText::new(format!("answered by {model}")).weak());
                        }
                    });
                });
            });
        });
    }

    fn render_chat_history(&self, ui: &mut egui::Ui) {
        for message in &self.chat_history {
            render_message(ui, message);
            ui.add_space(8.0);
        }
    }

    fn handle_close_request(&mut self, ctx: &egui::Context) {
        if ctx.input(|i| i.viewport().close_requested()) && !self.allow_close {
            ctx.send_viewport_cmd(egui::ViewportCommand::CancelClose);
            self.confirm_close = true;
        }

        if !self.confirm_close {
            return;
        }

        egui::Window::new("Confirm")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label("Are you sure you want to quit?");
                ui.horizontal(|ui| {
                    if ui.button("Yes").clicked() {
                        self.confirm_close = false;
                        self.allow_close = true;
                        self.stop_generation();
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                    if ui.button("No").clicked() {
                        self.confirm_close = false;
                    }
                });
            });
    }

    pub fn show_settings_window(&mut self, ctx: &egui::Context) {
        let mut show_settings = self.show_settings;
        egui::Window::new("Settings")
            .open(&mut show_settings)
            .resizable(false)
            .default_width(400.0)
            .show(ctx, |ui| {
                ui.heading("Model");
                ui.add_space(8.0);

                let loading = self.pending_models.is_some();
                let config = self.engine.config_mut();
                ui.horizontal(|ui| {
                    ui.label("Preferred model:");
                    egui::ComboBox::from_id_source("model_select")
                        .selected_text(&config.preferred_model)
                        .show_ui(ui, |ui| {
                            for model in &self.available_models {
                                ui.selectable_value(&mut config.preferred_model, model.clone(), model);
                            }
                        });
                });
                ui.label(format!("API version: {}", config.api_version));
                ui.label(format!("Fallbacks: {}", config.fallback_models.join(", ")));

                ui.add_space(8.0);
                ui.group(|ui| {
                    ui.label("Model Parameters");
                    ui.add_space(4.0);
                    ui.horizontal(|ui| {
                        ui.label("Temperature:");
                        ui.add(egui::Slider::new(&mut config.generation.temperature, 0.0..=2.0));
                    });
                    ui.horizontal(|ui| {
                        ui.label("Max Tokens:");
                        ui.add(egui::Slider::new(&mut config.generation.max_output_tokens, 256..=8192));
                    });
                });

                ui.add_space(8.0);
                if loading {
                    ui.spinner();
                } else if ui.button("⟳ Refresh model list").clicked() {
                    self.refresh_models();
                }
            });
        self.show_settings = show_settings;
    }
}

fn render_message(ui: &mut egui::Ui, message: &ChatMessage) {
    let time = message.created_at.with_timezone(&Local).format("%H:%M").to_string();
    let (label, color) = match message.role {
        Role::User => ("You", egui::Color32::from_rgb(120, 170, 255)),
        Role::Assistant => ("Gemini", egui::Color32::from_rgb(167, 139, 250)),
        Role::System => ("Note", egui::Color32::GRAY),
    };

    ui.horizontal(|ui| {
        ui.label(egui::RichText::new(label).strong().color(color));
        ui.label(egui::RichText::new(time).weak().small());
    });
    if message.role == Role::System {
        ui.label(egui::RichText::new(&message.content).italics().color(egui::Color32::GRAY));
    } else {
        ui.label(&message.content);
    }
}
