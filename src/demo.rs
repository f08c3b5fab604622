//! A small bot-like host program with the agent attached.
//!
//! Used by `stackscope demo` for manual sessions and by the integration
//! tests as a realistic target. Its state mirrors this source:
//!
//! ```text
//!  1  import json
//!  3  BOT_TOKEN = '5012345678:AAF4xQ9kLm2Zp7Rt3Vb8Nc1Wd6Ye0Ug5Hs'
//!  4  LEAK_KEY = '7012345678:xK3_pQ-9'
//!  5  admins = [1001, 1002]
//!  6  settings = {'retries': 3, 'api': {'key': LEAK_KEY}}
//!  8  class Bot(object):
//!  9      greeting = 'hello'
//! 10      def __init__(self):
//! 11          self.token = BOT_TOKEN
//! 12          self.handled = 0
//! 13      def handle(self, update):
//! 14          self.handled = self.handled + 1
//! 17  def main():
//! 18      bot = Bot()
//! 19      bot.handle({'text': 'ping', 'chat': {'id': 42}})
//! 21  def double(x):
//! 22      return x * 2
//! 24  poller = threading.Thread(target=poll, daemon=True)
//! 25  main()
//! ```

use std::sync::Arc;

use crate::agent;
use crate::runtime::{
    self, exec, CodeUnit, Constant, FrameGuard, Function, Module, Namespace, Opcode, Runtime,
    TypeDef, Value,
};
use crate::{Error, Result};

pub const MAIN_THREAD: u64 = 1;
pub const POLLER_THREAD: u64 = 2;
pub const BOT_TOKEN: &str = "5012345678:AAF4xQ9kLm2Zp7Rt3Vb8Nc1Wd6Ye0Ug5Hs";
pub const LEAK_KEY: &str = "7012345678:xK3_pQ-9";

const FILE: &str = "bot.py";

/// The demo runtime plus the frames it is "currently executing".
pub struct DemoHost {
    pub runtime: Arc<Runtime>,
    _frames: Vec<FrameGuard>,
}

impl DemoHost {
    /// Main thread stack, innermost first: `Bot.handle`, `main`, `<module>`.
    /// The daemon `poller` thread sits in `poll`.
    pub fn build() -> Result<Self> {
        let init_code = CodeUnit::builder("__init__", FILE, 10)
            .qualname("Bot.__init__")
            .params(&["self"])
            .line(11)
            .name_op(Opcode::LoadGlobal, "BOT_TOKEN")
            .local_op(Opcode::LoadFast, "self")
            .name_op(Opcode::StoreAttr, "token")
            .line(12)
            .load_const(Constant::Int(0))
            .local_op(Opcode::LoadFast, "self")
            .name_op(Opcode::StoreAttr, "handled")
            .load_const(Constant::None)
            .ret()
            .build();
        let handle_code = CodeUnit::builder("handle", FILE, 13)
            .qualname("Bot.handle")
            .params(&["self", "update"])
            .line(14)
            .local_op(Opcode::LoadFast, "self")
            .name_op(Opcode::LoadAttr, "handled")
            .load_const(Constant::Int(1))
            .op(Opcode::BinaryAdd)
            .local_op(Opcode::LoadFast, "self")
            .name_op(Opcode::StoreAttr, "handled")
            .load_const(Constant::None)
            .ret()
            .build();
        let main_code = CodeUnit::builder("main", FILE, 17)
            .line(18)
            .name_op(Opcode::LoadGlobal, "Bot")
            .call(0)
            .local_op(Opcode::StoreFast, "bot")
            .line(19)
            .local_op(Opcode::LoadFast, "bot")
            .name_op(Opcode::LoadAttr, "handle")
            .load_const(Constant::Str("ping".to_string()))
            .call(1)
            .op(Opcode::PopTop)
            .load_const(Constant::None)
            .ret()
            .build();
        let double_code = CodeUnit::builder("double", FILE, 21)
            .params(&["x"])
            .line(22)
            .local_op(Opcode::LoadFast, "x")
            .load_const(Constant::Int(2))
            .op(Opcode::BinaryMultiply)
            .ret()
            .build();
        let poll_code = CodeUnit::builder("poll", FILE, 27)
            .line(28)
            .name_op(Opcode::LoadGlobal, "settings")
            .name_op(Opcode::LoadAttr, "get")
            .load_const(Constant::Str("retries".to_string()))
            .call(1)
            .local_op(Opcode::StoreFast, "attempts")
            .load_const(Constant::None)
            .ret()
            .build();
        let module_code = module_code(&main_code, &double_code);

        let bot_type = Arc::new(
            TypeDef::new("Bot", "__main__")
                .with_bases(&["object"])
                .with_attr("greeting", Value::str("hello"))
                .with_method(Arc::new(Function::new("__main__", init_code)))
                .with_method(Arc::new(Function::new("__main__", Arc::clone(&handle_code))))
                .with_defaults(vec![
                    ("token", Value::str(BOT_TOKEN)),
                    ("handled", Value::Int(0)),
                ]),
        );

        let runtime = Arc::new(Runtime::new(
            Module::new("__main__").with_code(Arc::clone(&module_code)),
        ));
        let json = Arc::new(Module::new("json"));
        let threading = Arc::new(Module::new("threading"));
        runtime.register_module(Arc::clone(&json));
        runtime.register_module(threading);

        let threads = runtime.threads();
        threads.register(MAIN_THREAD, "MainThread", false);
        threads.set_main(MAIN_THREAD);
        let poller = threads.register(POLLER_THREAD, "poller", true);

        runtime.set_global("json", Value::Module(json));
        runtime.set_global("BOT_TOKEN", Value::str(BOT_TOKEN));
        runtime.set_global("LEAK_KEY", Value::str(LEAK_KEY));
        runtime.set_global("admins", Value::list(vec![Value::Int(1001), Value::Int(1002)]));
        runtime.set_global(
            "settings",
            Value::dict(vec![
                ("retries", Value::Int(3)),
                ("api", Value::dict(vec![("key", Value::str(LEAK_KEY))])),
            ]),
        );
        runtime.set_global("Bot", Value::Type(Arc::clone(&bot_type)));
        runtime.set_global(
            "main",
            Value::Function(Arc::new(Function::new("__main__", Arc::clone(&main_code)))),
        );
        runtime.set_global(
            "double",
            Value::Function(Arc::new(Function::new("__main__", double_code))),
        );
        runtime.set_global("poller", Value::Thread(poller));

        let bot = exec::instantiate(&bot_type)?;
        let update = Value::dict(vec![
            ("text", Value::str("ping")),
            ("chat", Value::dict(vec![("id", Value::Int(42))])),
        ]);

        let mut frames = Vec::new();
        let module_frame = runtime.enter(MAIN_THREAD, Arc::clone(&module_code), Namespace::new())?;
        module_frame.frame().advance(last_call(&module_code));
        frames.push(module_frame);

        let main_frame = runtime.enter(
            MAIN_THREAD,
            Arc::clone(&main_code),
            Namespace::from_pairs([("bot", bot.clone())]),
        )?;
        main_frame.frame().advance(last_call(&main_code));
        frames.push(main_frame);

        let handle_frame = runtime.enter(
            MAIN_THREAD,
            handle_code,
            Namespace::from_pairs([("self", bot), ("update", update)]),
        )?;
        handle_frame.frame().advance(2);
        frames.push(handle_frame);

        frames.push(runtime.enter(
            POLLER_THREAD,
            poll_code,
            Namespace::from_pairs([("interval", Value::Float(0.5))]),
        )?);

        Ok(Self {
            runtime,
            _frames: frames,
        })
    }
}

fn module_code(main_code: &Arc<CodeUnit>, double_code: &Arc<CodeUnit>) -> Arc<CodeUnit> {
    CodeUnit::builder("<module>", FILE, 1)
        .load_const(Constant::Int(0))
        .load_const(Constant::None)
        .name_op(Opcode::ImportName, "json")
        .name_op(Opcode::StoreName, "json")
        .line(3)
        .load_const(Constant::Str(BOT_TOKEN.to_string()))
        .name_op(Opcode::StoreName, "BOT_TOKEN")
        .line(4)
        .load_const(Constant::Str(LEAK_KEY.to_string()))
        .name_op(Opcode::StoreName, "LEAK_KEY")
        .line(5)
        .load_const(Constant::Int(1001))
        .load_const(Constant::Int(1002))
        .op_arg(Opcode::BuildList, 2)
        .name_op(Opcode::StoreName, "admins")
        .line(17)
        .load_const(Constant::Code(Arc::clone(main_code)))
        .load_const(Constant::Str("main".to_string()))
        .op_arg(Opcode::MakeFunction, 0)
        .name_op(Opcode::StoreName, "main")
        .line(21)
        .load_const(Constant::Code(Arc::clone(double_code)))
        .load_const(Constant::Str("double".to_string()))
        .op_arg(Opcode::MakeFunction, 0)
        .name_op(Opcode::StoreName, "double")
        .line(25)
        .name_op(Opcode::LoadName, "main")
        .call(0)
        .op(Opcode::PopTop)
        .load_const(Constant::None)
        .ret()
        .build()
}

fn last_call(code: &CodeUnit) -> u32 {
    code.instructions()
        .iter()
        .rev()
        .find(|i| i.opcode == Some(Opcode::CallFunction))
        .map(|i| i.offset)
        .unwrap_or(0)
}

/// Build the demo host, publish it, attach the agent and serve until Ctrl-C.
pub async fn run() -> Result<()> {
    let host = DemoHost::build()?;
    if !runtime::install(Arc::clone(&host.runtime)) {
        return Err(Error::NotFound("A host runtime is already installed".to_string()));
    }

    let handle = tokio::task::spawn_blocking(agent::start)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;
    println!("[stackscope] Demo host running, agent on {}", handle.local_addr());
    println!("[stackscope] Try 'stackscope send fnames' or 'stackscope console'. Ctrl-C stops.");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Demo host shutting down");
    drop(host);
    Ok(())
}
