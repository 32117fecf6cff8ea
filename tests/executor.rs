// tests/executor.rs

//! End-to-end runs of the supervisor against a scripted fake apt-get.

#[macro_use]
mod common;

use common::{fake_apt_get, logged_args, tempdir, test_config, write_script};
use debexec::{
    CancelToken, PackagePhase, PackageRef, ProgressEvent, RecordingSink, Transaction,
    TransactionFlags, TransactionResult, TransactionSupervisor,
};
use std::fs;
use std::thread;
use std::time::Duration;

fn install(names: &[&str]) -> Transaction {
    Transaction::new(
        names
            .iter()
            .map(|name| PackageRef::archive(*name, format!("/cache/{}.deb", name)))
            .collect(),
        vec![],
        vec![],
        TransactionFlags::default(),
    )
    .unwrap()
}

fn finished_count(sink: &RecordingSink, package: &str) -> usize {
    sink.package_events()
        .iter()
        .filter(|(pkg, phase, _)| pkg == package && *phase == PackagePhase::Finished)
        .count()
}

#[test]
fn test_simple_install() {
    require_pty!();
    let dir = tempdir();
    let apt_get = fake_apt_get(
        dir.path(),
        r#"echo "pmstatus:foo:20:Preparing foo" >&$fd
echo "Selecting previously unselected package foo."
echo "pmstatus:foo:40:Unpacking foo" >&$fd
echo "pmstatus:foo:60:Preparing to configure foo" >&$fd
echo "pmstatus:foo:80:Configuring foo" >&$fd
echo "pmstatus:foo:100:Installed foo" >&$fd
exit 0"#,
    );
    let helper = write_script(dir.path(), "helper", "exit 10\n");
    let supervisor = TransactionSupervisor::new(test_config(apt_get, helper));
    let sink = RecordingSink::new();

    let result = supervisor.execute(&install(&["foo"]), &sink).unwrap();
    assert_eq!(result, TransactionResult::Success);

    let events = sink.package_events();
    assert_eq!(events.first(), Some(&("foo".to_string(), PackagePhase::Preparing, Some(25))));
    assert_eq!(events.last(), Some(&("foo".to_string(), PackagePhase::Finished, None)));
    assert_eq!(finished_count(&sink, "foo"), 1);
    assert!(sink.events().contains(&ProgressEvent::Percentage { percent: 100 }));

    let args = logged_args(dir.path());
    let status_at = args.iter().position(|a| a.starts_with("APT::Status-Fd=")).unwrap();
    assert_eq!(args[status_at - 1], "-o");
    assert!(args.contains(&"Dpkg::Use-Pty=0".to_string()));
    assert_eq!(&args[args.len() - 4..], ["--yes", "--no-remove", "install", "/cache/foo.deb"]);
}

#[test]
fn test_sequential_packages_finish_in_order() {
    require_pty!();
    let dir = tempdir();
    let apt_get = fake_apt_get(
        dir.path(),
        r#"echo "pmstatus:foo:10:Preparing foo" >&$fd
echo "pmstatus:foo:30:Unpacking foo" >&$fd
echo "pmstatus:bar:50:Preparing bar" >&$fd
echo "pmstatus:bar:70:Unpacking bar" >&$fd
echo "pmstatus:bar:90:Running dpkg" >&$fd
exit 0"#,
    );
    let helper = write_script(dir.path(), "helper", "exit 10\n");
    let supervisor = TransactionSupervisor::new(test_config(apt_get, helper));
    let sink = RecordingSink::new();

    let result = supervisor.execute(&install(&["foo", "bar"]), &sink).unwrap();
    assert!(result.is_success());

    let finished: Vec<String> = sink
        .package_events()
        .into_iter()
        .filter(|(_, phase, _)| *phase == PackagePhase::Finished)
        .map(|(pkg, _, _)| pkg)
        .collect();
    // bar has no terminal line; it is closed when the transaction completes
    assert_eq!(finished, vec!["foo".to_string(), "bar".to_string()]);
}

#[test]
fn test_malformed_status_lines_are_skipped() {
    require_pty!();
    let dir = tempdir();
    let apt_get = fake_apt_get(
        dir.path(),
        r#"echo "garbage" >&$fd
echo "processing: install: foo" >&$fd
echo "pmstatus:foo:50:Preparing foo" >&$fd
echo "status: foo: unpacked" >&$fd
echo "pmstatus:foo:100:Installed foo" >&$fd
exit 0"#,
    );
    let helper = write_script(dir.path(), "helper", "exit 10\n");
    let supervisor = TransactionSupervisor::new(test_config(apt_get, helper));
    let sink = RecordingSink::new();

    let result = supervisor.execute(&install(&["foo"]), &sink).unwrap();
    assert_eq!(result, TransactionResult::Success);
    assert_eq!(
        sink.package_events(),
        vec![
            ("foo".to_string(), PackagePhase::Preparing, Some(25)),
            ("foo".to_string(), PackagePhase::Finished, None),
        ]
    );
}

#[test]
fn test_remove_then_install_passes() {
    require_pty!();
    let dir = tempdir();
    let apt_get = fake_apt_get(
        dir.path(),
        r#"if [ "$action" = "remove" ]; then
    echo "pmstatus:old:50:Removing old" >&$fd
    echo "pmstatus:old:100:Removed old" >&$fd
else
    echo "pmstatus:new:50:Preparing new" >&$fd
    echo "pmstatus:new:100:Installed new" >&$fd
fi
exit 0"#,
    );
    let helper = write_script(dir.path(), "helper", "exit 10\n");
    let supervisor = TransactionSupervisor::new(test_config(apt_get, helper));
    let sink = RecordingSink::new();
    let txn = Transaction::new(
        vec![PackageRef::archive("new", "/cache/new.deb")],
        vec![PackageRef::installed("old")],
        vec![],
        TransactionFlags::default(),
    )
    .unwrap();

    assert!(supervisor.execute(&txn, &sink).unwrap().is_success());

    let args = logged_args(dir.path());
    let remove_at = args.iter().position(|a| a == "remove").unwrap();
    let install_at = args.iter().position(|a| a == "install").unwrap();
    assert!(remove_at < install_at);
    assert_eq!(finished_count(&sink, "old"), 1);
    assert_eq!(finished_count(&sink, "new"), 1);
}

#[test]
fn test_conffile_answer_reaches_dpkg() {
    require_pty!();
    let dir = tempdir();
    let answer = dir.path().join("answer");
    let apt_get = fake_apt_get(
        dir.path(),
        &format!(
            r#"echo "pmstatus:foo:50:Configuring foo" >&$fd
echo "pmconffile:/etc/foo.conf:50:'/etc/foo.conf' '/etc/foo.conf.dpkg-new' 1 1" >&$fd
read reply
echo "$reply" > "{}"
echo "pmstatus:foo:100:Installed foo" >&$fd
exit 0"#,
            answer.display()
        ),
    );
    let helper = write_script(dir.path(), "helper", "exit 10\n");
    let supervisor = TransactionSupervisor::new(test_config(apt_get, helper));
    let sink = RecordingSink::new();

    assert!(supervisor.execute(&install(&["foo"]), &sink).unwrap().is_success());
    assert_eq!(fs::read_to_string(&answer).unwrap().trim(), "Y");
    assert!(
        !sink
            .events()
            .iter()
            .any(|e| matches!(e, ProgressEvent::ConfigFileChanged { .. }))
    );
}

#[test]
fn test_undecided_conffile_keeps_current() {
    require_pty!();
    let dir = tempdir();
    let answer = dir.path().join("answer");
    let apt_get = fake_apt_get(
        dir.path(),
        &format!(
            r#"echo "pmstatus:foo:50:Configuring foo" >&$fd
echo "pmconffile:/etc/foo.conf:50:'/etc/foo.conf' '/etc/foo.conf.dpkg-new' 1 1" >&$fd
read reply
echo "$reply" > "{}"
exit 0"#,
            answer.display()
        ),
    );
    let helper = write_script(dir.path(), "helper", "exit 1\n");
    let supervisor = TransactionSupervisor::new(test_config(apt_get, helper));
    let sink = RecordingSink::new();

    assert!(supervisor.execute(&install(&["foo"]), &sink).unwrap().is_success());
    assert_eq!(fs::read_to_string(&answer).unwrap().trim(), "N");
    assert!(sink.events().contains(&ProgressEvent::ConfigFileChanged {
        package: "foo".to_string(),
        original: "/etc/foo.conf".to_string(),
        new: "/etc/foo.conf.dpkg-new".to_string(),
    }));
}

#[test]
fn test_failure_reports_error_lines() {
    require_pty!();
    let dir = tempdir();
    let apt_get = fake_apt_get(
        dir.path(),
        r#"echo "pmstatus:foo:20:Preparing foo" >&$fd
echo "Reading package lists..."
echo "E: Sub-process /usr/bin/dpkg returned an error code (1)"
echo "W: not this one"
echo "E: Unable to correct problems"
exit 1"#,
    );
    let helper = write_script(dir.path(), "helper", "exit 10\n");
    let supervisor = TransactionSupervisor::new(test_config(apt_get, helper));
    let sink = RecordingSink::new();

    let result = supervisor.execute(&install(&["foo"]), &sink).unwrap();
    assert_eq!(
        result,
        TransactionResult::Failed(
            "E: Sub-process /usr/bin/dpkg returned an error code (1)\nE: Unable to correct problems"
                .to_string()
        )
    );
    assert_eq!(finished_count(&sink, "foo"), 0);
}

#[test]
fn test_pmerror_becomes_failure_message() {
    require_pty!();
    let dir = tempdir();
    let apt_get = fake_apt_get(
        dir.path(),
        r#"echo "pmstatus:foo:20:Preparing foo" >&$fd
echo "pmerror:foo:20:dependency problems - leaving unconfigured" >&$fd
exit 1"#,
    );
    let helper = write_script(dir.path(), "helper", "exit 10\n");
    let supervisor = TransactionSupervisor::new(test_config(apt_get, helper));
    let sink = RecordingSink::new();

    let result = supervisor.execute(&install(&["foo"]), &sink).unwrap();
    assert_eq!(
        result,
        TransactionResult::Failed("foo: dependency problems - leaving unconfigured".to_string())
    );
    assert!(sink.events().contains(&ProgressEvent::PackageError {
        package: "foo".to_string(),
        message: "dependency problems - leaving unconfigured".to_string(),
    }));
}

#[test]
fn test_cancellation_terminates_dpkg() {
    require_pty!();
    let dir = tempdir();
    let apt_get = fake_apt_get(
        dir.path(),
        r#"echo "pmstatus:foo:20:Preparing foo" >&$fd
exec sleep 30"#,
    );
    let helper = write_script(dir.path(), "helper", "exit 10\n");
    let token = CancelToken::new();
    let supervisor =
        TransactionSupervisor::new(test_config(apt_get, helper)).with_cancel_token(token.clone());
    let sink = RecordingSink::new();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        token.cancel();
    });

    let result = supervisor.execute(&install(&["foo"]), &sink).unwrap();
    canceller.join().unwrap();
    assert_eq!(result, TransactionResult::Cancelled);
}

#[test]
fn test_simulate_passes_simulate_flag() {
    require_pty!();
    let dir = tempdir();
    let apt_get = fake_apt_get(dir.path(), "exit 0");
    let helper = write_script(dir.path(), "helper", "exit 10\n");
    let supervisor = TransactionSupervisor::new(test_config(apt_get, helper));
    let txn = Transaction::new(
        vec![PackageRef::archive("foo", "/cache/foo.deb")],
        vec![],
        vec![],
        TransactionFlags {
            simulate_only: true,
            ..Default::default()
        },
    )
    .unwrap();

    assert!(supervisor.execute(&txn, &RecordingSink::new()).unwrap().is_success());
    assert!(logged_args(dir.path()).contains(&"--simulate".to_string()));
}

#[test]
fn test_download_only_never_spawns() {
    let dir = tempdir();
    let apt_get = fake_apt_get(dir.path(), "exit 0");
    let helper = write_script(dir.path(), "helper", "exit 10\n");
    let supervisor = TransactionSupervisor::new(test_config(apt_get, helper));
    let txn = Transaction::new(
        vec![PackageRef::archive("foo", "/cache/foo.deb")],
        vec![],
        vec![],
        TransactionFlags {
            download_only: true,
            ..Default::default()
        },
    )
    .unwrap();

    assert!(supervisor.execute(&txn, &RecordingSink::new()).unwrap().is_success());
    assert!(logged_args(dir.path()).is_empty());
}

#[test]
fn test_missing_apt_get_is_an_error() {
    require_pty!();
    let dir = tempdir();
    let helper = write_script(dir.path(), "helper", "exit 10\n");
    let supervisor =
        TransactionSupervisor::new(test_config(dir.path().join("no-such-apt-get"), helper));

    let result = supervisor.execute(&install(&["foo"]), &RecordingSink::new());
    assert!(matches!(result, Err(debexec::Error::SpawnError(_))));
}
