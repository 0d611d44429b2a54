//! Interactive session shell.
//!
//! Shows the `Auth` route while signed out and the `Tabs` route while
//! signed in, and maps typed commands onto the session store's actions.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use postboard_core::auth::AuthError;
use postboard_core::{AuthBackend, Config, Navigator, Route, SessionState, SessionStore};
use tracing::{debug, warn};

/// Maximum length for email and username input.
const MAX_INPUT_LENGTH: usize = 254;

/// Commands available at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SignIn,
    SignUp,
    SignOut,
    Help,
    Quit,
    Unknown(String),
}

/// Parse a prompt line for the given route. Commands outside their route are unknown.
pub fn parse_command(route: Route, input: &str) -> Command {
    let word = input.trim().to_lowercase();
    match (route, word.as_str()) {
        (_, "q" | "quit" | "exit") => Command::Quit,
        (_, "?" | "h" | "help") => Command::Help,
        (Route::Auth, "in" | "signin" | "login") => Command::SignIn,
        (Route::Auth, "up" | "signup" | "register") => Command::SignUp,
        (Route::Tabs, "out" | "signout" | "logout") => Command::SignOut,
        _ => Command::Unknown(word),
    }
}

/// The route the shell should show for a session state.
pub fn route_for(state: &SessionState) -> Route {
    if state.is_authenticated() {
        Route::Tabs
    } else {
        Route::Auth
    }
}

/// Validate and normalize a line of form input.
pub fn clean_input(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_INPUT_LENGTH || trimmed.chars().any(char::is_control) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub struct App {
    store: SessionStore,
    navigator: Navigator,
    config: Config,
    save_config: bool,
}

impl App {
    pub fn new(backend: Arc<dyn AuthBackend>, config: Config, save_config: bool) -> Self {
        Self {
            store: SessionStore::new(backend),
            navigator: Navigator::new(),
            config,
            save_config,
        }
    }

    /// Mount the store, run the prompt loop, and release the listener on every exit path.
    pub async fn run(&mut self) -> Result<()> {
        let listener = self.store.mount().await;
        let result = self.prompt_loop().await;
        listener.unmount().await;
        result
    }

    async fn prompt_loop(&mut self) -> Result<()> {
        let mut shown = None;
        loop {
            let route = self.sync_route();
            if shown != Some(route) {
                self.render(route);
                shown = Some(route);
            }

            let line = prompt(&format!("{}> ", route.name().to_lowercase()))?;
            let Some(line) = line else {
                // EOF
                return Ok(());
            };

            match parse_command(route, &line) {
                Command::Quit => return Ok(()),
                Command::Help => Self::print_help(route),
                Command::SignIn => self.sign_in().await?,
                Command::SignUp => self.sign_up().await?,
                Command::SignOut => self.sign_out().await,
                Command::Unknown(word) if word.is_empty() => {}
                Command::Unknown(word) => println!("Unknown command '{}'. Type 'help'.", word),
            }
        }
    }

    /// Point the navigator at the route matching the session.
    fn sync_route(&mut self) -> Route {
        let route = route_for(&self.store.state());
        if self.navigator.navigate(route) {
            debug!(route = route.name(), "Switching route");
        }
        self.navigator.current()
    }

    fn render(&self, route: Route) {
        if self.navigator.options(route).header_shown {
            println!("[{}]", route.name());
        }
        match route {
            Route::Auth => {
                println!("\n=== Postboard ===\n");
                println!("Not signed in. Commands: in, up, quit");
            }
            Route::Tabs => {
                let state = self.store.state();
                println!("\n=== Postboard ===\n");
                match state.profile {
                    Some(ref profile) => {
                        println!("Signed in as {} (@{})", profile.display(), profile.username);
                        if let Some(ref email) = profile.email {
                            println!("Email: {}", email);
                        }
                    }
                    None => {
                        let email = state.identity.as_ref().and_then(|i| i.email.as_deref());
                        println!("Signed in as {} (profile unavailable)", email.unwrap_or("unknown"));
                    }
                }
                println!("Commands: out, quit");
            }
        }
    }

    fn print_help(route: Route) {
        match route {
            Route::Auth => println!("in    sign in\nup    create an account\nquit  exit"),
            Route::Tabs => println!("out   sign out\nquit  exit"),
        }
    }

    fn prompt_email(&self) -> Result<Option<String>> {
        let input = match self.config.last_email {
            Some(ref last) => {
                let line = prompt(&format!("Email [{}]: ", last))?.unwrap_or_default();
                if line.trim().is_empty() {
                    last.clone()
                } else {
                    line
                }
            }
            None => prompt("Email: ")?.unwrap_or_default(),
        };
        Ok(clean_input(&input))
    }

    fn prompt_password() -> Result<String> {
        Ok(rpassword::prompt_password("Password: ")?)
    }

    fn remember_email(&mut self, email: String) {
        self.config.last_email = Some(email);
        if self.save_config {
            if let Err(e) = self.config.save() {
                warn!(error = %e, "Failed to save config");
            }
        }
    }

    async fn sign_in(&mut self) -> Result<()> {
        let Some(email) = self.prompt_email()? else {
            println!("Email is required");
            return Ok(());
        };
        let password = Self::prompt_password()?;

        println!("Signing in...");
        match self.store.sign_in(&email, &password).await {
            Ok(()) => self.remember_email(email),
            Err(e) => report(&e),
        }
        Ok(())
    }

    async fn sign_up(&mut self) -> Result<()> {
        let Some(email) = self.prompt_email()? else {
            println!("Email is required");
            return Ok(());
        };
        let username = prompt("Username: ")?
            .and_then(|u| clean_input(&u))
            .unwrap_or_default();
        let password = Self::prompt_password()?;

        println!("Creating account...");
        match self.store.sign_up(&email, &password, &username).await {
            Ok(()) => self.remember_email(email),
            Err(e) => report(&e),
        }
        Ok(())
    }

    async fn sign_out(&mut self) {
        if let Err(e) = self.store.sign_out().await {
            println!("Signed out locally ({})", e.user_message());
        }
    }
}

fn report(error: &AuthError) {
    println!("Error: {}", error.user_message());
}

/// Print a prompt and read one line. Returns `None` at end of input.
fn prompt(label: &str) -> Result<Option<String>> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim_end_matches(['\r', '\n']).to_string()))
}
