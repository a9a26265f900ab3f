//! Echo Bot Example
//!
//! A small demonstration of the usagi handler registry:
//!
//! - `echo <text>` — sends the text back;
//! - `ping` — replies "pong";
//! - `pick` — prompts for a number and waits for the user's next message,
//!   showing the conversational `wait_for_reply` flow.
//!
//! # Usage
//!
//! Point `usagi.toml` at a running mirai-api-http gateway, then:
//!
//! ```bash
//! cargo run --package echo-bot
//! ```

use std::time::Duration;

use usagi::prelude::*;

const CHOICES: [&str; 3] = ["tea", "coffee", "water"];

async fn echo(ctx: HandlerContext) -> HandlerResult<Option<Chain>> {
    let text = ctx.event().text.trim_start_matches("echo").trim().to_string();
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(ctx.chain().text(text)))
}

async fn pick(ctx: HandlerContext) -> HandlerResult<Option<Chain>> {
    let mut prompt_text = String::from("pick one:\n");
    for (i, choice) in CHOICES.iter().enumerate() {
        prompt_text.push_str(&format!("[{}] {}\n", i + 1, choice));
    }

    let prompt = ctx.chain().text(prompt_text);
    let Some(reply) = ctx
        .wait_for_reply(Some(prompt), Duration::from_secs(30))
        .await?
    else {
        return Ok(Some(ctx.chain().text("no answer, never mind")));
    };

    let choice = reply
        .text_digits()
        .chars()
        .find_map(|c| c.to_digit(10))
        .and_then(|d| CHOICES.get((d as usize).saturating_sub(1)));
    Ok(Some(match choice {
        Some(choice) => ctx.chain().text(format!("{choice} it is")),
        None => ctx.chain().text("that was not one of the options"),
    }))
}

#[tokio::main]
async fn main() -> RuntimeResult<()> {
    let registry = HandlerRegistry::builder()
        .on(
            "echo",
            |event| {
                if event.text.starts_with("echo") {
                    Verdict::hit(2)
                } else {
                    Verdict::miss()
                }
            },
            echo,
        )
        .on_keywords("ping", &["ping"], 1, |ctx: HandlerContext| async move {
            Ok(Some(ctx.chain().text("pong")))
        })
        .on_keywords("pick", &["pick"], 1, pick)
        .build();

    UsagiRuntime::builder().registry(registry).run().await
}
