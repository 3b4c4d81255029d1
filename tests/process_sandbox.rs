#![cfg(target_os = "linux")]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::Path,
    sync::Mutex,
    time::{Duration, Instant},
};

use algo_battle::{
    match_result::MatchupId,
    prelude::*,
    sandbox::{Role, RunLimits},
};

// Executing freshly written scripts while another thread forks can fail with ETXTBSY.
static SERIAL: Mutex<()> = Mutex::new(());

const GENERATOR: &str = r#"#!/bin/sh
read n
line=""
i=1
while [ "$i" -le "$n" ]; do
    line="$line $i"
    i=$((i + 1))
done
echo $line
echo "0 3 1 2"
"#;

const SOLVER: &str = "#!/bin/sh\ncat > /dev/null\necho \"0 3 1 2\"\n";

const SLEEPY_SOLVER: &str = "#!/bin/sh\nexec sleep 5\n";

const DEAF_SOLVER: &str = "#!/bin/sh\necho 0 1 2 3\n";

const FORKING_SOLVER: &str = "#!/bin/sh\nsleep 30 &\necho 0 1 2 3\n";

fn write_program(dir: &Path, script: &str) {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join("program.sh");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn uncontained() -> Configuration {
    Configuration::new()
        .with_verbose(false)
        .with_compile_programs(false)
        .with_allow_uncontained(true)
}

#[test]
fn prebuilt_scripts_battle_through_processes() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let teams = tempfile::tempdir().unwrap();
    write_program(&teams.path().join("steady/generator"), GENERATOR);
    write_program(&teams.path().join("steady/solver"), SOLVER);
    write_program(&teams.path().join("sleepy/generator"), GENERATOR);
    write_program(&teams.path().join("sleepy/solver"), SLEEPY_SOLVER);
    fs::create_dir_all(teams.path().join("not_a_team")).unwrap();

    let store = tempfile::tempdir().unwrap();
    let config = uncontained();
    let constraints = ConstraintsBuilder::new()
        .with_max_total_ram(1_000)
        .with_cpu_list("0")
        .with_generator_timeout(Duration::from_secs(5))
        .with_solver_timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let sandbox = ProcessSandbox::new(store.path(), config).unwrap();
    let arena = Arena::new(PairSum, sandbox, config, constraints);

    let specs = collect_teams(teams.path()).unwrap();
    assert_eq!(specs.len(), 2);

    let outcome = arena
        .run(specs, Battle::Iterated(Iterated::new().with_cap(20)), 1, 100)
        .unwrap();

    assert_eq!(
        outcome.result.rounds(&MatchupId::new("sleepy", "steady")).unwrap(),
        &[RoundResult::Solved(20)]
    );
    assert_eq!(
        outcome.result.rounds(&MatchupId::new("steady", "sleepy")).unwrap(),
        &[RoundResult::Solved(0)]
    );
    assert_eq!(outcome.points.get("steady"), Some(100.0));
    assert_eq!(outcome.points.get("sleepy"), Some(0.0));

    // every built program was released
    let left = fs::read_dir(store.path().join("store")).unwrap().count();
    assert_eq!(left, 0);
}

#[test]
fn background_processes_do_not_outlive_the_run() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let programs = tempfile::tempdir().unwrap();
    write_program(&programs.path().join("solver"), FORKING_SOLVER);

    let store = tempfile::tempdir().unwrap();
    let sandbox = ProcessSandbox::new(store.path(), uncontained()).unwrap();
    let interrupt = Interrupt::new();
    let handle = sandbox
        .build(
            &programs.path().join("solver"),
            "forking",
            Role::Solver,
            Duration::from_secs(5),
            &interrupt,
        )
        .unwrap();
    let limits = RunLimits {
        timeout: Duration::from_millis(500),
        memory_mb: None,
        cpus: String::new(),
    };

    let start = Instant::now();
    let output = sandbox.run(&handle, b"4\n", &limits, &interrupt);
    let elapsed = start.elapsed();

    assert!(elapsed < Duration::from_secs(3), "run took {elapsed:?}");
    assert_eq!(output.unwrap(), b"0 1 2 3\n");
    sandbox.release(handle);
}

#[test]
fn unread_input_does_not_fail_the_run() {
    let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let programs = tempfile::tempdir().unwrap();
    write_program(&programs.path().join("solver"), DEAF_SOLVER);

    let store = tempfile::tempdir().unwrap();
    let sandbox = ProcessSandbox::new(store.path(), uncontained()).unwrap();
    let interrupt = Interrupt::new();
    let handle = sandbox
        .build(
            &programs.path().join("solver"),
            "deaf",
            Role::Solver,
            Duration::from_secs(5),
            &interrupt,
        )
        .unwrap();
    let limits = RunLimits {
        timeout: Duration::from_secs(5),
        memory_mb: None,
        cpus: String::new(),
    };

    // far more than a pipe buffer, the program never reads it
    let input = vec![b'7'; 4 << 20];
    let output = sandbox.run(&handle, &input, &limits, &interrupt);
    assert_eq!(output.unwrap(), b"0 1 2 3\n");
    sandbox.release(handle);
}
