mod chart;
mod sim;

use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use token_bucket::{Clock, ManualClock, RefillPolicy, TokenBucket};
use tracing::{debug, info};

use sim::{Event, Handler};

/// Simulate a client sending requests through a token bucket.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Tokens the bucket starts with.
    #[arg(short, long, default_value_t = 10)]
    capacity: u64,
    /// Milliseconds between token refills.
    #[arg(short, long, default_value_t = 200)]
    interval_ms: u64,
    /// Tokens each request costs.
    #[arg(long, default_value_t = 1)]
    cost: u64,
    /// Simulated seconds per run.
    #[arg(short, long, default_value_t = 60)]
    duration_secs: u64,
    /// Maximum random delay added to each request.
    #[arg(short, long, default_value_t = 50)]
    jitter_ms: u64,
    /// Offered request rates to simulate, in requests per second.
    #[arg(short, long, value_delimiter = ',', default_values_t = [1.0, 2.0, 5.0, 10.0, 20.0])]
    rates: Vec<f64>,
    /// Clamp refills to the bucket's capacity.
    #[arg(long, default_value_t = false)]
    cap: bool,
    /// Seed for the request jitter.
    #[arg(long)]
    seed: Option<u64>,
    /// Show a chart of the results.
    #[arg(long, default_value_t = false)]
    chart: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    pub rate: f64,
    pub produced: u64,
    pub admitted: u64,
    pub rejected: u64,
}

struct State {
    bucket: TokenBucket<ManualClock>,
    produced: u64,
    admitted: u64,
    rejected: u64,
}

// Emits a request every `period`, each delayed by up to `jitter`.
struct Producer {
    period: Duration,
    jitter: Duration,
    cost: u64,
    rng: StdRng,
}

impl Handler<State> for Producer {
    fn call(mut self: Box<Self>, now: Instant, state: &mut State) -> Vec<Event<State>> {
        let delay = self.rng.gen_range(Duration::ZERO..=self.jitter);
        let request = Request { cost: self.cost };
        state.produced += 1;

        let mut events = Vec::with_capacity(2);
        if let Some(at) = now.checked_add(delay) {
            events.push(Event::new(at, request));
        }
        // Past the end of representable time there is nothing left to produce.
        if let Some(next) = now.checked_add(self.period) {
            events.push(Event::new(next, *self));
        }
        events
    }
}

struct Request {
    cost: u64,
}

impl Handler<State> for Request {
    fn call(self: Box<Self>, now: Instant, state: &mut State) -> Vec<Event<State>> {
        if state.bucket.take_n(self.cost) {
            state.admitted += 1;
        } else {
            state.rejected += 1;
        }
        debug!(?now, admitted = state.admitted, rejected = state.rejected, "request");
        vec![]
    }
}

fn run(cli: &Cli, rate: f64, rng: StdRng) -> Result<Outcome> {
    ensure!(rate.is_finite() && rate > 0.0, "rate must be positive, got {rate}");
    let period = Duration::try_from_secs_f64(1.0 / rate)
        .with_context(|| format!("rate {rate} is too low to simulate"))?;
    ensure!(!period.is_zero(), "rate {rate} is too high to simulate");

    let policy = if cli.cap {
        RefillPolicy::CapAtCapacity
    } else {
        RefillPolicy::Accumulate
    };
    let clock = ManualClock::new();
    let bucket = TokenBucket::with_clock(
        cli.capacity,
        Duration::from_millis(cli.interval_ms),
        clock.clone(),
    )
    .context("build token bucket")?
    .refill_policy(policy);

    let start = clock.now();
    let producer = Producer {
        period,
        jitter: Duration::from_millis(cli.jitter_ms),
        cost: cli.cost,
        rng,
    };
    let mut state = State {
        bucket,
        produced: 0,
        admitted: 0,
        rejected: 0,
    };
    let finish_at = start
        .checked_add(Duration::from_secs(cli.duration_secs))
        .context("duration is too long to simulate")?;
    sim::execute(&clock, &mut state, vec![Event::new(start, producer)], finish_at);

    Ok(Outcome {
        rate,
        produced: state.produced,
        admitted: state.admitted,
        rejected: state.rejected,
    })
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    info!(
        capacity = cli.capacity,
        interval_ms = cli.interval_ms,
        cost = cli.cost,
        cap = cli.cap,
        "starting simulation"
    );

    let mut outcomes = Vec::with_capacity(cli.rates.len());
    for (i, &rate) in cli.rates.iter().enumerate() {
        let rng = match cli.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(i as u64)),
            None => StdRng::from_entropy(),
        };
        let outcome = run(&cli, rate, rng).with_context(|| format!("simulate rate {rate}"))?;
        info!(
            rate = outcome.rate,
            produced = outcome.produced,
            admitted = outcome.admitted,
            rejected = outcome.rejected,
            "run finished"
        );
        outcomes.push(outcome);
    }

    if cli.chart {
        let title = format!(
            "Token bucket: {} tokens, +1 every {}ms, {}s",
            cli.capacity, cli.interval_ms, cli.duration_secs
        );
        chart::chart(&outcomes, &title)?;
    }

    Ok(())
}

fn init_tracing() {
    let env = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env).compact().init();
}
