use mk_core::source::Source;
use mk_core::{platform, NotifierModes, RunLoop, Thread};

#[test]
fn installed_platform_backs_new_run_loops() {
    mk_posix::install();
    assert_eq!(platform::current().name(), "posix");

    let run_loop = RunLoop::create(false);
    assert_eq!(run_loop.notifier_source().supported_modes(), NotifierModes::all());

    let worker = Thread::worker("posix-worker");
    assert!(worker.run_loop().notifier_source().is_functional());
}
