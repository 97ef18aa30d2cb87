//! The document portal's sign-in flow, end to end, against in-memory
//! stand-ins for the browser and the identity provider.
//!
//! Run with `RUST_LOG=keygate=debug` to watch the layers work.

use std::sync::Arc;
use std::time::Duration;

use keygate::prelude::*;

// ---------------------------------------------------------------------------
// Browser stand-in
// ---------------------------------------------------------------------------

/// Everything that survives a page load. The provider double stands in for
/// the provider's own cookies.
struct Browser {
    idp: MemoryIdp,
    location: Arc<MemoryLocation>,
    storage: Arc<MemoryStorage>,
    clock: ManualClock,
    config: KeygateConfig,
}

impl Browser {
    fn load(&self) -> Result<AuthContext<MemoryIdp>, KeygateError> {
        println!("\n── page load: {}", self.location.href());
        AuthContext::builder(self.idp.clone())
            .location(self.location.clone())
            .storage(self.storage.clone())
            .clock(Arc::new(self.clock.clone()))
            .config(self.config.clone())
            .routes(RouteTable::portal().role("/admin", "admin"))
            .build()
    }
}

fn print_decisions(auth: &AuthContext<MemoryIdp>) {
    for path in ["/", "/login", "/dashboard", "/documents", "/upload", "/profile", "/admin"] {
        let decision = auth.decide(path);
        match auth.redirect_target(&decision) {
            None => println!("   {path:<11} allow"),
            Some(target) => println!("   {path:<11} → {target}"),
        }
    }
}

fn print_identity(auth: &AuthContext<MemoryIdp>) {
    let Some(identity) = auth.identity() else {
        println!("   signed out");
        return;
    };
    println!("   user:   {} ({})", identity.full_name(), identity.display_username());
    println!("   avatar: {}", identity.initials());
    if let Some(email) = &identity.email {
        println!("   email:  {email}");
    }
    let roles: Vec<&str> = identity.client_roles.iter().collect();
    println!("   roles:  {}", roles.join(", "));
    if let Some(remaining) = auth.lifecycle().seconds_remaining() {
        println!("   token:  valid for {remaining}s");
    }
}

#[tokio::main]
async fn main() -> Result<(), KeygateError> {
    keygate::logging::init_tracing("keygate=info,document_portal=info");

    let config = KeygateConfig::from_env()?;
    tracing::info!(issuer = %config.issuer_url(), "portal configured");

    let clock = ManualClock::new(SystemClock.now_epoch_seconds());
    let location = Arc::new(MemoryLocation::new("http://localhost:3000/documents")?);
    let idp = MemoryIdp::new()
        .with_clock(Arc::new(clock.clone()))
        .with_location(location.clone());
    idp.set_user(
        MemoryUser::new("jdoe", &config.client_id, &["user"])
            .named("Jane", "Doe")
            .with_email("jane.doe@example.com")
            .with_token_lifetime(300),
    );
    let browser = Browser {
        idp: idp.clone(),
        location,
        storage: Arc::new(MemoryStorage::new()),
        clock,
        config,
    };

    // Signed out: one silent check, then the guard sends us to login.
    let page = browser.load()?;
    let signed_in = page.initialize().await?;
    println!("   initialized, signed in: {signed_in}");
    print_decisions(&page);
    page.login().await?;
    drop(page);

    // Back from the provider with `#state=…&code=…` in the address.
    let page = browser.load()?;
    println!("   address after sanitize: {}", browser.location.href());
    page.initialize().await?;
    print_identity(&page);
    print_decisions(&page);

    // The provider reports expiry; the pump renews in the background.
    browser.clock.advance(285);
    idp.fire(IdpEvent::TokenExpired);
    for _ in 0..100 {
        if page.lifecycle().last_refresh().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    match page.lifecycle().last_refresh() {
        Some(record) => println!("\n   scheduled renewal: {:?}", record.outcome),
        None => println!("\n   scheduled renewal did not run"),
    }
    print_identity(&page);

    page.logout().await;
    println!("\n   logged out, signed in: {}", page.is_logged_in());
    print_decisions(&page);

    // A stale error response in the address goes back to login once.
    browser
        .location
        .land_on("http://localhost:3000/dashboard#error=invalid_request&state=abc123")?;
    let page = browser.load()?;
    page.initialize().await?;
    println!("   state: {:?}, now at {}", page.state(), browser.location.href());

    Ok(())
}
