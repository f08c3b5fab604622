mod common;

use common::{start_agent, start_agent_with};
use stackscope::demo::{BOT_TOKEN, LEAK_KEY};
use stackscope::introspect::encoder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_getvar_and_unknown_command() {
    let agent = start_agent();

    assert_eq!(
        agent.send("getvar", "admins").await,
        "admins:\n  Type: list\n  Value: [1001, 1002]"
    );
    assert_eq!(
        agent.send("getvar", "missing").await,
        "Variable 'missing' not found"
    );
    // Callables and classes are not variables.
    assert_eq!(agent.send("getvar", "main").await, "Variable 'main' not found");
    assert_eq!(agent.send("bogus", "x").await, "Unknown command: bogus");
}

#[tokio::test]
async fn test_request_without_colon() {
    let agent = start_agent();
    let mut stream = TcpStream::connect(agent.addr).await.unwrap();
    stream.write_all(b"modules").await.unwrap();
    stream.shutdown().await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "Loaded modules:\n__main__\njson\nthreading");
}

#[tokio::test]
async fn test_frame_listing_and_ranges() {
    let agent = start_agent();

    assert_eq!(
        agent.send("fnames", "").await,
        "Stack frames:\n[0] Bot.handle\n[1] main\n[2] <module>"
    );
    assert_eq!(
        agent.send("fdump", "7").await,
        "Error: Frame index 7 out of range (max index: 2)"
    );
    assert_eq!(std::fs::read_dir(agent.dump_dir.path()).unwrap().count(), 0);
    assert_eq!(
        agent.send("fdis", "-1").await,
        "Error: Frame index -1 out of range (max index: 2)"
    );
    assert_eq!(
        agent.send("fdis", "abc").await,
        "Error: Frame index must be an integer"
    );

    let dis = agent.send("fdis", "1").await;
    assert!(dis.starts_with(" 18"), "{}", dis);
    assert!(dis.contains("LOAD_GLOBAL"));
    assert!(dis.contains("(Bot)"));
    assert!(dis.contains("(bot)"));
}

#[tokio::test]
async fn test_frame_dumps_are_decodable_images() {
    let agent = start_agent();

    let reply = agent.send("fdump", "0").await;
    let path = agent.dump_dir.path().join("handle.scu");
    assert_eq!(reply, format!("Frame 0 dumped to {}", path.display()));

    let (header, unit) = encoder::decode(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(header.magic, encoder::RUNTIME_MAGIC);
    assert_eq!(unit.qualname, "Bot.handle");

    assert_eq!(agent.send("fsdump", "").await, "Dumped 3 frames");
    for name in ["0_handle.scu", "1_main.scu", "2__module_.scu"] {
        assert!(agent.dump_dir.path().join(name).exists(), "{}", name);
    }
}

#[tokio::test]
async fn test_dump_dis_and_capture() {
    let agent = start_agent();
    let dir = agent.dump_dir.path();

    assert_eq!(
        agent.send("dump", "main").await,
        format!("Bytecode dumped to {}", dir.join("main.scu").display())
    );
    assert_eq!(
        agent.send("dump", "admins").await,
        "Invalid target for encoding: [1001, 1002]"
    );
    assert_eq!(agent.send("dis", "admins").await, "Invalid object for disassembly");
    assert!(agent.send("dis", "double").await.contains("BINARY_MULTIPLY"));

    assert_eq!(
        agent.send("capture", "").await,
        format!("Bytecode dumped to {}", dir.join("module.scu").display())
    );
    let (_, module) = encoder::decode(&std::fs::read(dir.join("module.scu")).unwrap()).unwrap();
    assert_eq!(module.name, "<module>");
}

#[tokio::test]
async fn test_tokens_grouped_by_pattern() {
    let agent = start_agent();
    let expected = format!(
        "Found Telegram bot tokens:\n\
         Variable BOT_TOKEN: {bot}\n\
         Class Bot.token: {bot}\n\n\
         Found leak api tokens:\n\
         Variable LEAK_KEY: {leak}\n\
         Variable settings['api']['key']: {leak}",
        bot = BOT_TOKEN,
        leak = LEAK_KEY
    );
    assert_eq!(agent.send("tokens", "").await, expected);
}

#[tokio::test]
async fn test_findvar_searches_every_frame() {
    let agent = start_agent();

    assert_eq!(
        agent.send("findvar", "chat").await,
        "[TID 1] Bot.handle (bot.py:14): update['chat'] = {'id': 42}"
    );
    // The same instance is reachable from two frames; each is reported.
    assert_eq!(
        agent.send("findvar", "handled").await,
        "[TID 1] Bot.handle (bot.py:14): self.handled = 0\n\
         [TID 1] main (bot.py:19): bot.handled = 0"
    );
    assert_eq!(
        agent.send("findvar", "interval").await,
        "[TID 2] poll (bot.py:27): interval = 0.5"
    );
    assert_eq!(
        agent.send("findvar", "nothing_like_this").await,
        "Variable or attribute 'nothing_like_this' not found"
    );
}

#[tokio::test]
async fn test_structure_and_outline() {
    let agent = start_agent();

    assert_eq!(
        agent.send("structure", "").await,
        "Module\n\
         ├── Bot (class)\n\
         │   ├── __init__ (class method)\n\
         │   └── handle (class method)\n\
         ├── main (function)\n\
         ├── double (function)\n\
         ├── json (module)\n\
         ├── poller (thread)\n\
         ├── BOT_TOKEN (variable)\n\
         ├── LEAK_KEY (variable)\n\
         ├── admins (variable)\n\
         └── settings (variable)\n"
    );

    let outline = agent.send("struct", "").await;
    assert!(outline.contains("class Bot(object):\n    def handle(...):"));
    assert!(outline.contains("admins = [1001, 1002]"));
    assert!(outline.contains("settings = ..."));
    assert!(!outline.contains("__init__"));
}

#[tokio::test]
async fn test_exec_then_read_back() {
    let agent = start_agent();

    assert_eq!(
        agent.send("exec", "answer = 42\nname = 'bot'").await,
        "Code injected successfully"
    );
    assert_eq!(
        agent.send("getvar", "answer").await,
        "answer:\n  Type: int\n  Value: 42"
    );
    assert!(agent
        .send("objects-type", "str")
        .await
        .contains("name:\n  Type: str\n  Value: 'bot'"));

    let fault = agent.send("exec", "import os").await;
    assert!(fault.starts_with("[ERROR] SyntaxError"), "{}", fault);
    // The listener survives faults.
    assert!(agent.send("globals", "").await.contains("'answer': 42"));
}

#[tokio::test]
async fn test_deep_nesting_does_not_take_down_host() {
    let agent = start_agent();

    let brackets = format!("x = {}{}", "[".repeat(200_000), "]".repeat(200_000));
    let fault = agent.send("exec", &brackets).await;
    assert!(fault.starts_with("[ERROR] SyntaxError"), "{}", &fault[..fault.len().min(80)]);
    assert!(fault.contains("too many nested parentheses"));

    let mut chain = String::from("x = []\n");
    chain.push_str(&"x = [x]\n".repeat(100_000));
    assert_eq!(agent.send("exec", &chain).await, "Code injected successfully");

    let shown = agent.send("getvar", "x").await;
    assert!(shown.starts_with("x:\n  Type: list\n  Value: [[["));
    assert!(shown.contains("[...]"));
    assert!(agent.send("globals", "").await.contains("'x': [[["));
    assert_eq!(agent.send("exec", "x = 1").await, "Code injected successfully");
    assert_eq!(agent.send("getvar", "x").await, "x:\n  Type: int\n  Value: 1");
}

#[tokio::test]
async fn test_exec_disabled() {
    let agent = start_agent_with(|s| s.exec_enabled = false);
    assert_eq!(
        agent.send("exec", "answer = 42").await,
        "Code execution is disabled"
    );
    assert_eq!(
        agent.send("getvar", "answer").await,
        "Variable 'answer' not found"
    );
}

#[tokio::test]
async fn test_class_inspection() {
    let agent = start_agent();

    assert_eq!(
        agent.send("search", "Bot.token").await,
        format!("'{}'", BOT_TOKEN)
    );
    assert_eq!(agent.send("search", "nobody.home").await, "'nobody' not found");

    let attrs = agent.send("searchattr", "Bot").await;
    assert!(attrs.starts_with("Class 'Bot' attributes:\n"));
    assert!(attrs.contains("Instance attributes:\n"));
    assert!(attrs.contains("'handled': 0"));
    assert_eq!(agent.send("searchattr", "Ghost").await, "Class 'Ghost' not found");
}

#[tokio::test]
async fn test_threads_locals_and_backtrace() {
    let agent = start_agent();

    assert_eq!(
        agent.send("threads", "").await,
        "Active threads:\n[1] MainThread (daemon=False)\n[2] poller (daemon=True)"
    );

    let locals = agent.send("locals", "").await;
    assert!(locals.starts_with("frame 1:  Bot.handle\n"), "{}", locals);
    assert!(locals.contains("frame 2:  main\n"));
    assert!(!locals.contains("<module>"));

    assert!(agent.send("backtrace", "").await.starts_with("Call stack:"));
}

#[tokio::test]
async fn test_oversized_request_rejected() {
    let agent = start_agent_with(|s| s.max_request_bytes = 64);
    let payload = "x".repeat(200);
    assert_eq!(
        agent.send("getvar", &payload).await,
        "Request exceeds 64 bytes"
    );
    assert_eq!(agent.send("modules", "").await.lines().next(), Some("Loaded modules:"));
}

#[tokio::test]
async fn test_concurrent_connections() {
    let agent = start_agent();
    let addr = agent.addr;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            tokio::spawn(async move {
                stackscope::client::send_command(
                    addr,
                    "fnames",
                    "",
                    std::time::Duration::from_secs(5),
                )
                .await
                .unwrap()
            })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap().starts_with("Stack frames:\n[0] Bot.handle"));
    }
}
