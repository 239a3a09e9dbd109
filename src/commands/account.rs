use colored::Colorize;

use super::CommandHandler;
use crate::account::AccountSummary;

fn print_summary(user: &AccountSummary) {
    println!("👤 {} ({})", user.email.bold(), user.subscription);
    if let Some(end) = user.subscription_end_date {
        println!("   Premium until {}", end.format("%Y-%m-%d"));
    }
    println!("   Analyses today: {}", user.daily_analysis_count);
}

fn credentials(argument: &str) -> Result<(&str, &str), String> {
    let mut parts = argument.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(email), Some(password)) => Ok((email, password)),
        _ => Err("Usage: <command> <email> <password>".to_string()),
    }
}

pub async fn handle_command(handler: &mut CommandHandler, input: &str) -> Result<(), String> {
    let input = input.trim();
    let command = input.split_whitespace().next().unwrap_or("");
    let argument = input.trim_start_matches(command).trim();
    let client = handler.subscription.clone();

    match command {
        "register" => {
            let (email, password) = credentials(argument)?;
            let user = client.register(email, password).await.map_err(|e| e.to_string())?;
            println!("{}", "✅ Account created. Log in with 'login <email> <password>'.".green());
            print_summary(&user);
        }
        "login" => {
            let (email, password) = credentials(argument)?;
            let user = client.login(email, password).await.map_err(|e| e.to_string())?;
            print_summary(&user);
        }
        "whoami" => {
            let user = client.current_user().await.map_err(|e| e.to_string())?;
            print_summary(&user);
        }
        "status" => {
            let status = client.status().await.map_err(|e| e.to_string())?;
            match status.subscription_end_date {
                Some(end) => println!("Subscription: {} (until {})", status.subscription, end.format("%Y-%m-%d")),
                None => println!("Subscription: {}", status.subscription),
            }
        }
        "premium" => {
            let user = client.upgrade().await.map_err(|e| e.to_string())?;
            println!("{}", "⭐ Subscription upgraded successfully".green());
            print_summary(&user);
        }
        _ => {
            println!("Account commands:\n- register <email> <password>\n- login <email> <password>\n- whoami\n- status (Server subscription status)\n- premium (Upgrade the account for 30 days)");
        }
    }

    Ok(())
}
