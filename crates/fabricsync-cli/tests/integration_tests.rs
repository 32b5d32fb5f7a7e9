//! Integration tests for CLI commands

use std::process::Command;

/// Instant the fixtures are evaluated at; att-1 has then been orphaned for two days
const AT: &str = "2026-01-03T00:00:00Z";

/// Helper to run the fabricsync command
fn fabricsync(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_fabricsync"))
        .args(args)
        .env_remove("FABRICSYNC_POLICY")
        .env_remove("FABRICSYNC_USER")
        .env_remove("FABRICSYNC_LOG")
        .output()
        .expect("Failed to execute fabricsync")
}

/// Get a fixture path
fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).expect("Output should be valid JSON")
}

mod drift_command {
    use super::*;

    #[test]
    fn test_drift_table() {
        let output = fabricsync(&["drift", &fixture("fabric.yaml"), "--at", AT]);

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("default/VPC/vpc-1"));
        assert!(stdout.contains("1 drifted, 1 missing from cluster, 1 untracked in git"));
    }

    #[test]
    fn test_drift_json_output() {
        let output = fabricsync(&["drift", &fixture("fabric.yaml"), "--json", "--at", AT]);

        assert!(output.status.success());
        let json = stdout_json(&output);
        assert_eq!(json["fabric"], "lab");
        assert_eq!(json["drifted"], 3);

        let resources = json["resources"].as_array().unwrap();
        assert_eq!(resources.len(), 4);
        let vpc = resources
            .iter()
            .find(|r| r["resource"]["name"] == "vpc-1")
            .unwrap();
        assert_eq!(vpc["drift"]["status"], "spec_drift");
        assert_eq!(vpc["resource"]["resourceState"], "drifted");
    }

    #[test]
    fn test_drift_shows_diff() {
        let output = fabricsync(&["drift", &fixture("fabric.yaml"), "--diff", "--at", AT]);

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("--- git/default/VPC/vpc-1"));
        assert!(stdout.contains("-mtu: 1500"));
        assert!(stdout.contains("+mtu: 9000"));
    }

    #[test]
    fn test_drift_exit_code() {
        let output = fabricsync(&["drift", &fixture("fabric.yaml"), "--exit-code", "--at", AT]);

        assert_eq!(output.status.code(), Some(3));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("3 resource(s) drifted"));
    }

    #[test]
    fn test_missing_snapshot() {
        let output = fabricsync(&["drift", &fixture("does-not-exist.yaml")]);

        assert_eq!(output.status.code(), Some(5));
    }

    #[test]
    fn test_duplicate_snapshot_entries() {
        let output = fabricsync(&["drift", &fixture("duplicate.yaml")]);

        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("twice"));
    }
}

mod conflicts_command {
    use super::*;

    #[test]
    fn test_conflicts_for_one_resource() {
        let output = fabricsync(&[
            "conflicts",
            &fixture("fabric.yaml"),
            "--resource",
            "default/VPC/vpc-1",
            "--strategy",
            "favor_cluster",
            "--json",
        ]);

        assert!(output.status.success());
        let json = stdout_json(&output);
        let plan = &json[0];
        assert_eq!(plan["conflicts"][0]["fieldPath"], "mtu");
        assert_eq!(plan["report"]["strategy"], "favor_cluster");
        assert_eq!(plan["mergedSpec"]["mtu"], 9000);
    }

    #[test]
    fn test_critical_conflict_needs_review() {
        let output = fabricsync(&["conflicts", &fixture("identity.yaml")]);

        assert_eq!(output.status.code(), Some(6));
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("manual review"));
    }

    #[test]
    fn test_manual_strategy_accepts_critical_conflict() {
        let output = fabricsync(&["conflicts", &fixture("identity.yaml"), "-s", "manual"]);

        assert!(output.status.success());
    }

    #[test]
    fn test_unknown_strategy() {
        let output = fabricsync(&["conflicts", &fixture("fabric.yaml"), "-s", "coin-flip"]);

        assert!(!output.status.success());
    }
}

mod orphans_command {
    use super::*;

    #[test]
    fn test_orphans_json() {
        let output = fabricsync(&["orphans", &fixture("fabric.yaml"), "--json", "--at", AT]);

        assert!(output.status.success());
        let json = stdout_json(&output);
        let orphans = json.as_array().unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0]["finding"]["key"]["name"], "att-1");
        assert_eq!(orphans[0]["finding"]["orphanedDuration"], 2 * 86_400);
        assert_eq!(orphans[0]["finding"]["severity"], "high");
        assert_eq!(orphans[0]["alert"]["alertType"], "orphaned_resource");
    }

    #[test]
    fn test_orphans_with_policy() {
        let output = fabricsync(&[
            "orphans",
            &fixture("fabric.yaml"),
            "--policy",
            &fixture("policy.yaml"),
            "--json",
            "--at",
            AT,
        ]);

        assert!(output.status.success());
        let json = stdout_json(&output);
        assert_eq!(json[0]["finding"]["severity"], "medium");
    }

    #[test]
    fn test_orphans_table() {
        let output = fabricsync(&["orphans", &fixture("fabric.yaml"), "--at", AT]);

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("default/VPCAttachment/att-1"));
        assert!(stdout.contains("2d"));
        assert!(stdout.contains("import_to_git"));
    }
}

mod reconcile_command {
    use super::*;

    #[test]
    fn test_reconcile_with_approval() {
        let output = fabricsync(&[
            "reconcile",
            &fixture("fabric.yaml"),
            "--requested-by",
            "alice",
            "--json",
            "--at",
            AT,
        ]);

        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let json = stdout_json(&output);
        assert_eq!(json["drifted"], 3);
        assert_eq!(json["orphans"], 1);
        let batch = &json["batch"];
        assert_eq!(batch["strategy"], "dependency_aware");
        assert_eq!(batch["status"], "completed");
        assert_eq!(batch["total"], 3);
        assert_eq!(batch["failed"], 0);
    }

    #[test]
    fn test_reconcile_without_approval_fails_sync() {
        let output = fabricsync(&["reconcile", &fixture("fabric.yaml"), "--json", "--at", AT]);

        assert_eq!(output.status.code(), Some(4));
        let json = stdout_json(&output);
        let failed: Vec<_> = json["batch"]["items"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|i| i["status"] == "failed")
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["resource"], "default/Subnet/sub-1");
        assert_eq!(failed[0]["action"], "sync_to_cluster");
    }

    #[test]
    fn test_reconcile_dry_run() {
        let output = fabricsync(&[
            "reconcile",
            &fixture("fabric.yaml"),
            "--dry-run",
            "--strategy",
            "sequential",
            "--at",
            AT,
        ]);

        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("dry run"));
        assert!(stdout.contains("[dry-run] would run"));
    }

    #[test]
    fn test_reconcile_failing_collaborator() {
        let output = fabricsync(&[
            "reconcile",
            &fixture("fabric.yaml"),
            "--requested-by",
            "alice",
            "--fail-on",
            "default/VPCAttachment/att-1",
            "--json",
            "--at",
            AT,
        ]);

        assert_eq!(output.status.code(), Some(4));
        let json = stdout_json(&output);
        assert_eq!(json["batch"]["failed"], 1);
        assert_eq!(json["batch"]["successful"], 2);
    }
}

mod transition_commands {
    use super::*;

    #[test]
    fn test_transition_table_from_state() {
        let output = fabricsync(&["transitions", "--from", "orphaned", "--json"]);

        assert!(output.status.success());
        let json = stdout_json(&output);
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r["from"] == "orphaned"));
        assert!(
            rows.iter()
                .any(|r| r["trigger"] == "delete" && r["requiresUserApproval"] == true)
        );
    }

    #[test]
    fn test_full_transition_table() {
        let output = fabricsync(&["transitions"]);

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("TRIGGER"));
        assert!(stdout.contains("sync_timeout"));
    }

    #[test]
    fn test_delete_requires_approval() {
        let output = fabricsync(&[
            "transition",
            &fixture("fabric.yaml"),
            "default/Switch/leaf-1",
            "--to",
            "pending",
            "--trigger",
            "delete",
        ]);

        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("requires user approval"));
    }

    #[test]
    fn test_approved_delete() {
        let output = fabricsync(&[
            "transition",
            &fixture("fabric.yaml"),
            "default/Switch/leaf-1",
            "--to",
            "pending",
            "--trigger",
            "delete",
            "--approved-by",
            "alice",
            "--json",
        ]);

        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let json = stdout_json(&output);
        assert_eq!(json["accepted"], true);
        assert_eq!(json["resource"]["resourceState"], "pending");
        assert_eq!(json["resource"]["driftStatus"], "deletion_pending");
        assert_eq!(json["record"]["user"], "alice");
    }

    #[test]
    fn test_unknown_resource() {
        let output = fabricsync(&[
            "transition",
            &fixture("fabric.yaml"),
            "default/Switch/spine-9",
            "--to",
            "pending",
            "--trigger",
            "delete",
        ]);

        assert_eq!(output.status.code(), Some(2));
    }
}
