//! Closed-loop MPC demonstration
//!
//! Runs a scenario in soft real time: the plant is simulated at the control
//! rate, re-plans run on the background thread and the control loop never
//! waits for them.
//!
//! ```text
//! cargo run --example closed_loop -- [double_integrator | pendulum | swing_up]
//! RUST_LOG=debug cargo run --example closed_loop
//! ```

use std::thread;
use std::time::{Duration, Instant};

use optcon_core::{CostFunction, Discretizer, Dynamics, Integrator};
use optcon_mpc::scenarios::{
    double_integrator_regulation, pendulum_stabilization, pendulum_swing_up, Scenario,
};
use optcon_mpc::{ControlSource, MpcError};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let which = std::env::args().nth(1).unwrap_or_else(|| "double_integrator".into());
    match which.as_str() {
        "double_integrator" => run(double_integrator_regulation()?, 3.0),
        "pendulum" => run(pendulum_stabilization()?, 4.0),
        "swing_up" => run(pendulum_swing_up()?, 5.0),
        other => Err(format!("unknown scenario '{other}'").into()),
    }
}

fn run<D, C>(scenario: Scenario<D, C>, duration: f64) -> Result<(), Box<dyn std::error::Error>>
where
    D: Dynamics + Send + Sync + 'static,
    C: CostFunction + Send + Sync + 'static,
{
    println!("=== Closed-loop MPC: {} ===\n", scenario.name);
    println!("Horizon: {} steps of {} s", scenario.horizon(), scenario.settings.nloc.dt);
    println!("Re-plan period: {} s", scenario.settings.mpc.replan_period);
    println!("Initial state: {:?}\n", scenario.initial_state.as_slice());

    let mut mpc = scenario.controller()?;
    let control_period = scenario.settings.mpc.timing.control_period;
    let plant = Discretizer::new(control_period, Integrator::Rk4);
    let steps = (duration / control_period).round() as usize;

    let mut x = scenario.initial_state.clone();
    let mut stale_ticks = 0;
    let mut fallback_ticks = 0;
    let wall_start = Instant::now();

    for k in 0..=steps {
        let t = k as f64 * control_period;
        let tick = Instant::now();

        let out = match mpc.step(t, &x) {
            Ok(out) => out,
            Err(MpcError::Stopped) => break,
            Err(e) => return Err(e.into()),
        };
        match out.source {
            ControlSource::Stale => stale_ticks += 1,
            ControlSource::Fallback => fallback_ticks += 1,
            ControlSource::Fresh | ControlSource::Extrapolated => {}
        }

        if k % (steps / 10).max(1) == 0 {
            println!(
                "t = {t:5.2} s  x = {:.4?}  u = {:.4?}  policy v{}",
                x.as_slice(),
                out.u.as_slice(),
                out.version
            );
        }

        x = plant.step(scenario.dynamics.as_ref(), &x, &out.u, t);

        // Hold the loop to the control rate
        if let Some(rest) = Duration::from_secs_f64(control_period).checked_sub(tick.elapsed()) {
            thread::sleep(rest);
        }
    }

    mpc.cancel_replan();

    println!("\n=== Summary ===");
    println!("Final state: {:?}", x.as_slice());
    println!("Terminal cost: {:.6}", scenario.cost.terminal(&x, duration));
    println!("Policies published: {}", mpc.buffer().version());
    println!("Stale ticks: {stale_ticks}, fallback ticks: {fallback_ticks}");
    if let Some(delay) = mpc.time_keeper().measured_delay() {
        println!("Last solve time: {:.2} ms", delay.as_secs_f64() * 1e3);
    }
    println!("Wall time: {:.2} s", wall_start.elapsed().as_secs_f64());
    Ok(())
}
