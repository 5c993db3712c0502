//! 记忆生命周期集成测试：阶段判断端到端场景、任务迁移与归档、子任务依赖

#[cfg(test)]
mod tests {
    use bee_memory::config::AppConfig;
    use bee_memory::core::{classify, TaskPhase};
    use bee_memory::memory::{
        EpisodicMemory, MemoryManager, StepStatus, SubtaskManager, TaskStatus, WorkingMemory,
    };
    use bee_memory::AgentMemory;
    use tempfile::TempDir;

    #[test]
    fn test_t1_phase_scenario() {
        let dir = TempDir::new().unwrap();
        let mut memory = MemoryManager::open(dir.path()).unwrap();
        let (id, _) = memory.create_task("add logging", Some("T1")).unwrap();
        assert_eq!(id, "T1");

        let mut wm = WorkingMemory::new();
        for i in 0..16 {
            wm.record_read(format!("src/module_{}.rs", i));
        }
        assert!(wm.files_written().is_empty());
        let advice = classify(16, &wm, 100);
        assert_eq!(advice.phase, TaskPhase::Analyze);

        for _ in 0..4 {
            wm.record_read("loop.py");
        }
        let advice = classify(20, &wm, 100);
        assert_eq!(advice.phase, TaskPhase::Stuck);
        assert!(advice.urgent);
        assert!(advice.message.contains("loop.py"));
    }

    #[test]
    fn test_t1_complete_then_archive() {
        let dir = TempDir::new().unwrap();
        let mut memory = MemoryManager::open(dir.path()).unwrap();
        memory.create_task("add logging", Some("T1")).unwrap();
        let active = dir.path().join("tasks/active/task_T1.md");
        assert!(active.exists());

        memory.complete_task("T1", true).unwrap();
        let completed = dir.path().join("tasks/completed/task_T1.md");
        assert!(!active.exists());
        assert!(completed.exists());
        assert_eq!(memory.get_task("T1").unwrap().status, TaskStatus::Completed);

        assert_eq!(memory.archive_older_than(0).unwrap(), 1);
        let month = chrono::Local::now().format("%Y-%m").to_string();
        let archived = dir
            .path()
            .join("tasks/archived")
            .join(&month)
            .join("task_T1.md");
        assert!(!completed.exists());
        assert!(archived.exists());
        let record = memory.get_task("T1").unwrap();
        assert_eq!(record.status, TaskStatus::Archived);
        assert_eq!(memory.task_path("T1").unwrap(), archived);

        // 索引持久化后重新打开仍一致
        let reopened = MemoryManager::open(dir.path()).unwrap();
        assert_eq!(reopened.get_task("T1").unwrap().status, TaskStatus::Archived);
        assert_eq!(reopened.stats().archived, 1);
    }

    #[test]
    fn test_exactly_one_location_after_mixed_operations() {
        let dir = TempDir::new().unwrap();
        let mut memory = MemoryManager::open(dir.path()).unwrap();
        for id in ["A", "B", "C", "D"] {
            memory.create_task(id, Some(id)).unwrap();
        }
        memory.complete_task("A", true).unwrap();
        memory.complete_task("B", false).unwrap();
        memory.complete_task("C", true).unwrap();
        memory.archive_older_than(0).unwrap();

        for id in ["A", "B", "C", "D"] {
            let name = format!("task_{}.md", id);
            let mut hits = Vec::new();
            for sub in ["tasks/active", "tasks/completed"] {
                let p = dir.path().join(sub).join(&name);
                if p.exists() {
                    hits.push(p);
                }
            }
            for month in std::fs::read_dir(dir.path().join("tasks/archived")).unwrap() {
                let p = month.unwrap().path().join(&name);
                if p.exists() {
                    hits.push(p);
                }
            }
            assert_eq!(hits, vec![memory.task_path(id).unwrap()], "task {}", id);
        }
        assert_eq!(memory.get_task("B").unwrap().status, TaskStatus::Failed);
        assert_eq!(memory.get_task("D").unwrap().status, TaskStatus::Active);
    }

    #[test]
    fn test_subtask_documents_follow_lifecycle() {
        let dir = TempDir::new().unwrap();
        let mut memory = MemoryManager::open(dir.path()).unwrap();
        memory.create_task("release", Some("R")).unwrap();
        let mut subs = SubtaskManager::open(dir.path(), "R").unwrap();

        let build = subs.create_subtask(&mut memory, "build", &[]).unwrap();
        let publish = subs
            .create_subtask(&mut memory, "publish", &[build.as_str()])
            .unwrap();
        assert!(dir.path().join("tasks/active/task_R_sub1.md").exists());

        assert_eq!(subs.next_ready().as_deref(), Some(build.as_str()));
        assert!(subs.start(&build));
        assert!(subs.complete(&mut memory, &build, Some("ok"), true));
        assert_eq!(subs.next_ready().as_deref(), Some(publish.as_str()));
        assert!(dir.path().join("tasks/completed/task_R_sub1.md").exists());
    }

    #[test]
    fn test_agent_memory_run() {
        let dir = TempDir::new().unwrap();
        let mut memory = MemoryManager::open(dir.path()).unwrap();
        let cfg = AppConfig::default();
        let mut agent = AgentMemory::start(&mut memory, "add logging", &cfg).unwrap();
        let id = agent.task_id().to_string();

        for i in 0..16 {
            agent.begin_iteration();
            agent.observe_read(&format!("src/m{}.rs", i));
        }
        assert_eq!(agent.guidance().phase, TaskPhase::Analyze);
        for _ in 0..3 {
            agent.begin_iteration();
            agent.observe_read("loop.py");
        }
        let advice = agent.guidance();
        assert_eq!(advice.phase, TaskPhase::Stuck);

        let doc = EpisodicMemory::at(memory.task_path(&id).unwrap(), id.as_str());
        doc.update_step("collect sources", StepStatus::Done);
        let prompt = agent.prompt_context();
        assert!(prompt.contains("**Phase**: stuck"));
        assert!(prompt.contains("- [x] collect sources"));
        assert!(prompt.contains("URGENT"));

        agent.finish(&mut memory, true, "logging added").unwrap();
        assert_eq!(memory.get_task(&id).unwrap().status, TaskStatus::Completed);
    }
}
