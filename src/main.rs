use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;

use shopsync::config::Config;
use shopsync::gateway::HttpGateway;
use shopsync::notify::{ChannelNotifier, Notification, Severity};
use shopsync::storefront::{members, orders, restock};
use shopsync::storefront::{AddToCart, BackInStockRequest, Cart, CartApi, UpdateMemberInfo};
use shopsync::{logging, MutationError, QueryClient};

#[derive(Parser, Debug)]
#[command(name = "shopsync")]
#[command(about = "Storefront client with optimistic cart updates")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shopsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show or change the cart
  Cart {
    #[command(subcommand)]
    action: CartAction,
  },
  /// List your orders
  Orders {
    /// Load every page instead of only the first
    #[arg(long)]
    all: bool,
  },
  /// Look up a single order
  Order { id: String },
  /// Get an email when a product is back in stock
  Restock {
    #[arg(long)]
    email: String,
    #[arg(long)]
    item_url: String,
    #[arg(long)]
    product_id: String,
    #[arg(long)]
    variant: Option<String>,
  },
  /// Update your member profile
  Profile {
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
  },
}

#[derive(Subcommand, Debug)]
enum CartAction {
  Show,
  Add {
    product_id: String,
    #[arg(short, long, default_value_t = 1)]
    quantity: u32,
    /// Product option as NAME=VALUE, may be repeated
    #[arg(long = "option", value_parser = parse_option)]
    options: Vec<(String, String)>,
  },
  SetQty {
    line_item_id: String,
    quantity: u32,
  },
  Remove {
    line_item_id: String,
  },
  Clear,
}

fn parse_option(s: &str) -> Result<(String, String), String> {
  s.split_once('=')
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .ok_or_else(|| format!("expected NAME=VALUE, got {:?}", s))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let gateway = HttpGateway::new(&config)?;
  let (notifier, mut notifications) = ChannelNotifier::new();
  let (client, worker) = QueryClient::new(Arc::new(gateway), Arc::new(notifier));
  let client = client.with_stale_time(config.stale_time());
  let worker = tokio::spawn(worker.run());

  let printer = tokio::spawn(async move {
    while let Some(notification) = notifications.recv().await {
      print_notification(&notification);
    }
  });

  let outcome = run(args.command, &client, &config).await;

  // Dropping the client closes the notification channel once pending
  // mutations are done, which lets the printer drain and finish.
  drop(client);
  let _ = printer.await;
  worker.abort();

  match outcome? {
    true => Ok(ExitCode::SUCCESS),
    false => Ok(ExitCode::FAILURE),
  }
}

/// Returns `false` when the server rejected a mutation. The user has already
/// been notified in that case.
async fn run(command: Command, client: &QueryClient, config: &Config) -> Result<bool> {
  match command {
    Command::Cart { action } => {
      let cart = CartApi::new(client.clone()).with_clear_retry(config.mutations.retry.into());
      run_cart(action, &cart).await
    }
    Command::Orders { all } => {
      let mut history = orders::order_history(client, config.orders.page_size);
      history.load_next_page().await?;
      while all && history.has_next_page() {
        history.load_next_page().await?;
      }

      if history.item_count() == 0 {
        println!("No orders yet");
      }
      for order in history.items() {
        let date = order
          .created_date
          .map(|d| d.format("%Y-%m-%d").to_string())
          .unwrap_or_default();
        println!(
          "{:<20} {:<10} {}",
          order.label(),
          date,
          order.status.as_deref().unwrap_or("")
        );
      }
      if history.has_next_page() {
        println!("More orders available, use --all to list them");
      }
      Ok(true)
    }
    Command::Order { id } => {
      match orders::get_order(client, &id).await? {
        Some(order) => println!("{}\n{}", order.label(), serde_json::to_string_pretty(&order)?),
        None => println!("Order {} not found", id),
      }
      Ok(true)
    }
    Command::Restock {
      email,
      item_url,
      product_id,
      variant,
    } => {
      let mut request = BackInStockRequest::new(email, item_url, product_id);
      request.variant_id = variant;
      let subscribed = settled(restock::subscribe(client, &request).await)?;
      if subscribed {
        println!("You will be notified when this product is back in stock");
      }
      Ok(subscribed)
    }
    Command::Profile {
      first_name,
      last_name,
    } => {
      let values = UpdateMemberInfo {
        first_name,
        last_name,
      };
      settled(members::update_member(client, &values, config.refresh_delay()).await)
    }
  }
}

async fn run_cart(action: CartAction, cart: &CartApi) -> Result<bool> {
  let ok = match action {
    CartAction::Show => true,
    CartAction::Add {
      product_id,
      quantity,
      options,
    } => {
      let mut values = AddToCart::new(product_id, quantity);
      values.selected_options.extend(options);
      settled(cart.add_item(&values).await)?
    }
    CartAction::SetQty {
      line_item_id,
      quantity,
    } => settled(cart.update_quantity(&line_item_id, quantity).await)?,
    CartAction::Remove { line_item_id } => settled(cart.remove_item(&line_item_id).await)?,
    CartAction::Clear => settled(cart.clear().await)?,
  };

  print_cart(cart.cart().await?.as_ref());
  Ok(ok)
}

fn settled<T>(result: std::result::Result<T, MutationError>) -> Result<bool> {
  match result {
    Ok(_) => Ok(true),
    Err(MutationError::Gateway(e)) => {
      debug!("mutation rejected: {}", e);
      Ok(false)
    }
    Err(e) => Err(e.into()),
  }
}

fn print_cart(cart: Option<&Cart>) {
  let Some(cart) = cart.filter(|c| !c.line_items.is_empty()) else {
    println!("Your cart is empty");
    return;
  };

  for item in &cart.line_items {
    println!("{:>3} x {:<40} {}", item.quantity, item.display_name(), item.id);
  }
  println!("{} item(s)", cart.item_count());
}

fn print_notification(notification: &Notification) {
  match notification.severity {
    Severity::Destructive => eprintln!("error: {}", notification.message),
    Severity::Info | Severity::Success => println!("{}", notification.message),
  }
}
