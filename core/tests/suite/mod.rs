// Aggregates the launcher and monitor scenarios as modules.
mod launcher;
mod monitor;
