use std::io::{self, Write};
use std::time::Duration;

use anyhow::Result;
use log::info;

use novella::error::SessionError;
use novella::images::{Backdrop, BackgroundRequest};
use novella::llm::ModelClient;
use novella::scene::Scene;
use novella::session::{GameSession, SessionState};

const IMAGE_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render_scene(scene: &Scene, backdrop: &mut Backdrop) {
    // The placeholder is shown until the image has been fetched.
    println!("\n----------------------------------------");
    println!("  [Background] {}", backdrop.current());
    if backdrop.is_pending() {
        println!("  (image loading)");
    }
    println!("----------------------------------------");

    if let Some(narration) = scene.narration_header() {
        println!("\n  {narration}");
    }

    match &scene.speaker {
        Some(speaker) => {
            let mood = scene.mood.map(|m| format!(" ({m:?})")).unwrap_or_default();
            println!("\n[{speaker}{mood}]: {}", scene.main_text());
        }
        None => println!("\n{}", scene.main_text()),
    }

    if !scene.is_ending {
        println!();
        for (i, choice) in scene.choices.iter().enumerate() {
            println!("  [{}] {}  <{}>", i + 1, choice.text, choice.sentiment);
        }
    }
}

fn show_ending(scene: &Scene, turns: usize) {
    println!("\n========================================");
    println!("               THE END");
    println!("========================================");
    match scene.ending_type {
        Some(ending) => println!("  Ending: {ending}"),
        None => println!("  Ending: unknown"),
    }
    println!("  Choices made: {turns}");
    println!("========================================\n");
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

fn read_line() -> Result<String> {
    print!("> ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Read a choice by number or id. Returns `None` when the player quits.
fn prompt_choice(scene: &Scene, backdrop: &mut Backdrop) -> Result<Option<String>> {
    loop {
        if backdrop.is_pending() {
            let shown = backdrop.current().to_string();
            if !backdrop.is_pending() {
                println!("  [Background] {shown}");
            }
        }

        let input = read_line()?;

        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            return Ok(None);
        }

        let by_number = input
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| scene.choices.get(i));
        if let Some(choice) = by_number.or_else(|| scene.choice(&input)) {
            return Ok(Some(choice.id.clone()));
        }

        println!("  Pick 1-{} (or type quit).", scene.choices.len());
    }
}

/// Read the player's post-game choice. Returns `true` to restart, `false` to quit.
fn prompt_restart() -> Result<bool> {
    println!("  [r] Restart    [q] Quit\n");
    loop {
        match read_line()?.to_lowercase().as_str() {
            "r" => return Ok(true),
            "q" => return Ok(false),
            _ => println!("  Press [r] to restart or [q] to quit."),
        }
    }
}

/// After a failed model turn. Returns `true` to try again.
fn prompt_retry() -> Result<bool> {
    println!("  [r] Try again    [q] Quit");
    loop {
        match read_line()?.to_lowercase().as_str() {
            "r" => return Ok(true),
            "q" => return Ok(false),
            _ => println!("  Press [r] to try again or [q] to quit."),
        }
    }
}

// ---------------------------------------------------------------------------
// Single playthrough
// ---------------------------------------------------------------------------

enum RoundOutcome {
    Finished,
    Quit,
}

fn play_round<C: ModelClient>(
    session: &mut GameSession<C>,
    background: &BackgroundRequest,
) -> Result<RoundOutcome> {
    loop {
        println!("\n(Loading...)");
        match session.start() {
            Ok(_) => break,
            Err(e) => {
                println!("\n(The story could not begin: {e})");
                if !prompt_retry()? {
                    return Ok(RoundOutcome::Quit);
                }
            }
        }
    }

    let mut backdrop: Option<Backdrop> = None;
    loop {
        let Some(scene) = session.scene().cloned() else {
            return Ok(RoundOutcome::Quit);
        };
        let shown = backdrop.get_or_insert_with(|| {
            Backdrop::load(background, &scene.background_description, IMAGE_TIMEOUT)
        });
        render_scene(&scene, shown);

        if session.state() == SessionState::Ended {
            show_ending(&scene, session.turns());
            return Ok(RoundOutcome::Finished);
        }

        let Some(choice_id) = prompt_choice(&scene, shown)? else {
            return Ok(RoundOutcome::Quit);
        };
        info!("Player chose '{choice_id}'");

        // A failed turn leaves the scene and its backdrop in place; redraw
        // them and ask again.
        println!("\n(Loading...)");
        match session.choose(&choice_id) {
            Ok(_) => backdrop = None,
            Err(e) => {
                println!("\n(Something went wrong: {e})");
                if matches!(e, SessionError::Engine(_)) && !prompt_retry()? {
                    return Ok(RoundOutcome::Quit);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry point: plays stories until the player quits
// ---------------------------------------------------------------------------

pub fn run<C: ModelClient>(
    session: &mut GameSession<C>,
    background: &BackgroundRequest,
) -> Result<()> {
    loop {
        println!("\n========================================");
        println!("          NOVELLA: THAT NIGHT");
        println!("========================================");
        println!("Pick a numbered choice to continue the story.");
        println!("Type quit at any time to leave.\n");

        let outcome = play_round(session, background)?;

        if let RoundOutcome::Quit = outcome {
            println!("\n  You close the story for now.");
        }

        if !prompt_restart()? {
            println!("Thanks for playing!");
            break;
        }

        session.restart();
        info!("Player chose to restart");
    }

    Ok(())
}
