use colored::Colorize;
use log::warn;
use std::sync::Arc;

use crate::food::api::SubscriptionClient;
use crate::food::AnalysisOrchestrator;

pub mod account;
pub mod food_cmd;

pub struct CommandHandler {
    orchestrator: AnalysisOrchestrator,
    subscription: Arc<SubscriptionClient>,
}

impl CommandHandler {
    pub fn new(orchestrator: AnalysisOrchestrator, subscription: Arc<SubscriptionClient>) -> Self {
        Self {
            orchestrator,
            subscription,
        }
    }

    /// Mirrors a completed analysis to the server count when logged in.
    async fn report_server_usage(&self) {
        if !self.subscription.is_logged_in() {
            return;
        }
        if let Err(e) = self.subscription.report_usage().await {
            warn!("Failed to report usage to the subscription service: {}", e);
        }
    }

    pub async fn handle_command(&mut self, input: &str) -> Result<(), String> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(());
        }

        match input.split_whitespace().next() {
            Some("help") => {
                self.print_help();
                Ok(())
            }
            Some("analyze" | "history" | "quota" | "upgrade" | "decline") => {
                food_cmd::handle_command(self, input).await
            }
            Some("register" | "login" | "whoami" | "status" | "premium") => {
                account::handle_command(self, input).await
            }
            _ => Err(format!("Unknown command '{}'. Type 'help' for the list.", input)),
        }
    }

    fn print_help(&self) {
        println!("{}", "🥗 NutriBox".bold());
        println!("  analyze <image path>      Get nutrition facts for a food photo");
        println!("  history [YYYY-MM]         Past analyses for a month, newest first");
        println!("  quota                     Analyses left today");
        println!("  upgrade | decline         Answer the premium offer");
        println!("  register <email> <pass>   Create an account");
        println!("  login <email> <pass>      Log in to the subscription service");
        println!("  whoami | status | premium Account and subscription");
        println!("  exit                      Quit");
    }
}
