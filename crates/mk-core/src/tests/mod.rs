mod bindings;
mod properties;
mod run_loop;
mod signals;
mod threads;
