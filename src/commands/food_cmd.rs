use chrono::{Datelike, NaiveDate};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use super::CommandHandler;
use crate::food::history::AnalysisRecord;
use crate::food::{AnalysisOutcome, AnalysisState};

fn print_record(record: &AnalysisRecord) {
    println!(
        "🍽️  {}  {}",
        record.captured_at.format("%Y-%m-%d %H:%M").to_string().bold(),
        record.image_reference.dimmed()
    );
    println!("   Total Calories: {} kcal", record.result.total_calories().to_string().green());
    for (i, dish) in record.result.dishes.iter().enumerate() {
        println!("   Dish {}: {}", i + 1, dish);
    }
    if let Some(comment) = &record.result.comment {
        println!("   💬 {}", comment.italic());
    }
}

/// Parses `YYYY-MM`, defaulting to `current`.
fn parse_month(arg: &str, current: (i32, u32)) -> Result<(i32, u32), String> {
    if arg.is_empty() {
        return Ok(current);
    }
    NaiveDate::parse_from_str(&format!("{}-01", arg), "%Y-%m-%d")
        .map(|d| (d.year(), d.month()))
        .map_err(|_| format!("Expected a month like 2024-05, got '{}'", arg))
}

pub async fn handle_command(handler: &mut CommandHandler, input: &str) -> Result<(), String> {
    let input = input.trim();
    let command = input.split_whitespace().next().unwrap_or("");
    let argument = input.trim_start_matches(command).trim();

    match command {
        "analyze" => {
            if argument.is_empty() {
                println!("Please specify an image to analyze.");
                return Ok(());
            }

            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner} {msg}")
                    .map_err(|e| e.to_string())?,
            );
            spinner.set_message("Analyzing image...");
            spinner.enable_steady_tick(Duration::from_millis(120));

            let outcome = handler.orchestrator.analyze(argument).await;
            spinner.finish_and_clear();

            match outcome {
                Ok(AnalysisOutcome::Completed { record, saved_to_history, .. }) => {
                    print_record(&record);
                    if !saved_to_history {
                        println!("{}", "Failed to save to history. Please try again.".yellow());
                    }
                    handler.report_server_usage().await;
                }
                Ok(AnalysisOutcome::Blocked(offer)) => {
                    println!(
                        "{}",
                        format!(
                            "You've used your {} free analysis for today.",
                            offer.free_daily_limit
                        )
                        .yellow()
                    );
                    println!("Type 'upgrade' to go premium or 'decline' to dismiss.");
                }
                Err(e) if e.is_retryable() => {
                    return Err(format!("❌ {} (run 'analyze {}' to retry)", e, argument));
                }
                Err(e) => return Err(format!("❌ {}", e)),
            }
        }
        "upgrade" => {
            let upgraded = if handler.orchestrator.state() == AnalysisState::Blocked {
                handler.orchestrator.accept_upgrade().await.map_err(|e| e.to_string())?
            } else {
                handler.orchestrator.quota().upgrade().await
            };

            if upgraded {
                println!("{}", "⭐ Premium unlocked: unlimited analyses.".green());
            } else {
                return Err("Could not save the upgrade. Please try again.".to_string());
            }
        }
        "decline" => {
            handler.orchestrator.decline_upgrade().map_err(|e| e.to_string())?;
            println!("Maybe later.");
        }
        "quota" => {
            let remaining = handler
                .orchestrator
                .quota()
                .remaining()
                .await
                .map_err(|e| e.to_string())?;
            match remaining {
                None => println!("Premium: unlimited analyses."),
                Some(n) => println!("{} analyses left today.", n),
            }
        }
        "history" => {
            let history = handler.orchestrator.history();
            let (year, month) = parse_month(argument, history.current_month())?;
            let records = history.list_month(year, month).await;
            if records.is_empty() {
                println!("No previous analyses for {}-{:02}.", year, month);
            }
            for record in &records {
                print_record(record);
            }
        }
        _ => {
            println!("Available commands:\n- analyze <image path> (Get nutrition facts for a photo)\n- history [YYYY-MM] (Past analyses for a month)\n- quota (Analyses left today)\n- upgrade / decline (Answer the premium offer)");
        }
    }

    Ok(())
}
