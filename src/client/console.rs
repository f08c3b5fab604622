use std::path::Path;

/// Help language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    En,
    Ru,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleAction {
    Quit,
    Nothing,
    Clear,
    Print(String),
    Send {
        command: &'static str,
        payload: String,
    },
}

/// Console verb, server command, whether the arguments are forwarded.
const VERBS: &[(&str, &str, bool)] = &[
    ("objects", "structure", false),
    ("structure", "structure", false),
    ("struct", "struct", false),
    ("dump", "dump", true),
    ("dis", "dis", true),
    ("get", "getvar", true),
    ("getvar", "getvar", true),
    ("objects-type", "objects-type", true),
    ("search", "search", true),
    ("dict", "searchattr", true),
    ("searchattr", "searchattr", true),
    ("rrun", "exec", true),
    ("exec", "exec", true),
    ("capture", "capture", false),
    ("modules", "modules", false),
    ("stack", "backtrace", false),
    ("backtrace", "backtrace", false),
    ("threads", "threads", false),
    ("tokens", "tokens", false),
    ("locals", "locals", false),
    ("globals", "globals", false),
    ("find", "findvar", true),
    ("findvar", "findvar", true),
    ("fnames", "fnames", false),
    ("fsdump", "fsdump", false),
    ("fdump", "fdump", true),
    ("fdis", "fdis", true),
];

const HELP: &[(&str, &str, &str)] = &[
    ("objects", "Display module structure. Usage: 'objects'", "Показать структуру модуля. Использование: 'objects'"),
    ("struct", "Show program structure. Usage: 'struct'", "Показывает структуру программы. Использование: 'struct'"),
    ("dump", "Dump object bytecode. Usage: 'dump <object>'", "Выгрузить байткод объекта. Использование: 'dump <объект>'"),
    ("dis", "Disassemble object. Usage: 'dis <function>'", "Дизассемблировать объект. Использование: 'dis <функция>'"),
    ("get", "Get variable. Usage: 'get <variable>'", "Получить переменную. Использование: 'get <переменная>'"),
    ("objects-type", "Find vars by type. Usage: 'objects-type <type>'", "Найти переменные по типу. Использование: 'objects-type <тип>'"),
    ("search", "Inspect class attributes. Usage: 'search <Class.attr>'", "Просмотреть атрибуты класса. Использование: 'search <Класс.атрибут>'"),
    ("dict", "Show class attributes. Usage: 'dict <class_name>'", "Показать атрибуты класса. Использование: 'dict <имя_класса>'"),
    ("rrun", "Execute code. Usage: 'rrun <file.py>' or 'rrun <statement>'", "Выполнить код. Использование: 'rrun <файл.py>' или 'rrun <оператор>'"),
    ("capture", "Dump whole module. Usage: 'capture'", "Сдампить весь модуль. Использование: 'capture'"),
    ("modules", "Show loaded modules. Usage: 'modules'", "Показать загруженные модули. Использование: 'modules'"),
    ("stack", "Show agent call stack. Usage: 'stack'", "Показать стек вызовов агента. Использование: 'stack'"),
    ("threads", "List active threads", "Список активных потоков"),
    ("tokens", "Search for bot and api tokens. Usage: 'tokens'", "Поиск токенов ботов и api. Использование: 'tokens'"),
    ("locals", "Show local variables in all stack frames. Usage: 'locals'", "Показать локальные переменные во всех фреймах стека. Использование: 'locals'"),
    ("globals", "Show global variables in module frame. Usage: 'globals'", "Показывать глобальные переменные во фрейме модуля. Использование: 'globals'"),
    ("find", "Find where a variable is referenced. Usage: 'find <var>'", "Найти использования переменной. Использование: 'find <переменная>'"),
    ("fnames", "Show all frame names. Usage: 'fnames'", "Показать имена всех фреймов. Использование: 'fnames'"),
    ("fdump", "Dump frame. Usage: 'fdump <index>'", "Сдампить фрейм. Использование: 'fdump <индекс фрейма>'"),
    ("fsdump", "Dump all frames. Usage: 'fsdump'", "Сдампить все фреймы. Использование: 'fsdump'"),
    ("fdis", "Disassemble frame. Usage: 'fdis <index>'", "Дизассемблировать фрейм. Использование: 'fdis <индекс фрейма>'"),
    ("export", "Save last command output to file. Usage: 'export <filename>'", "Сохранить вывод последней команды в файл. Использование: 'export <имя файла>'"),
    ("setlang", "Change console language. Usage: 'setlang en/ru'", "Сменить язык консоли. Использование: 'setlang en/ru'"),
    ("clear", "Clear console. Usage: 'clear'", "Очистить консоль. Использование: 'clear'"),
    ("help", "Show help", "Показать помощь"),
    ("q", "Exit console", "Выйти из консоли"),
];

/// Line interpreter. Local commands are answered here; everything else is
/// turned into a request for the caller to send.
pub struct Console {
    lang: Lang,
    last_response: String,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        Self {
            lang: Lang::En,
            last_response: String::new(),
        }
    }

    pub fn lang(&self) -> Lang {
        self.lang
    }

    pub fn last_response(&self) -> &str {
        &self.last_response
    }

    /// Remember a server response for `export`.
    pub fn record(&mut self, response: &str) {
        self.last_response = response.to_string();
    }

    pub fn help(&self) -> String {
        HELP.iter()
            .map(|(verb, en, ru)| {
                let text = match self.lang {
                    Lang::En => en,
                    Lang::Ru => ru,
                };
                format!("{}: {}", verb, text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn execute(&mut self, line: &str) -> ConsoleAction {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return ConsoleAction::Nothing;
        };
        let verb = verb.to_lowercase();
        let args = words.collect::<Vec<_>>().join(" ");

        match verb.as_str() {
            "q" => ConsoleAction::Quit,
            "clear" => ConsoleAction::Clear,
            "help" => ConsoleAction::Print(self.help()),
            "setlang" => match args.as_str() {
                "en" | "eng" => {
                    self.lang = Lang::En;
                    ConsoleAction::Nothing
                }
                "ru" => {
                    self.lang = Lang::Ru;
                    ConsoleAction::Nothing
                }
                _ => ConsoleAction::Print("Usage: setlang en/ru".to_string()),
            },
            "export" => ConsoleAction::Print(self.export(&args)),
            _ => self.request(&verb, args),
        }
    }

    fn export(&self, target: &str) -> String {
        if target.is_empty() {
            return "Usage: export <filename>".to_string();
        }
        match std::fs::write(target, &self.last_response) {
            Ok(()) => format!("Output saved to {}", target),
            Err(e) => format!("Error saving file: {}", e),
        }
    }

    fn request(&self, verb: &str, args: String) -> ConsoleAction {
        let Some(&(_, command, forwards_args)) = VERBS.iter().find(|(v, _, _)| *v == verb) else {
            return ConsoleAction::Print(format!(
                "Unknown command: {}. Type 'help' for commands",
                verb
            ));
        };

        let payload = if !forwards_args {
            String::new()
        } else if command == "exec" && args.ends_with(".py") {
            // Scripts are read on this side; only their text crosses the wire.
            match std::fs::read_to_string(Path::new(&args)) {
                Ok(source) => source,
                Err(e) => return ConsoleAction::Print(format!("Cannot read {}: {}", args, e)),
            }
        } else {
            args
        };
        ConsoleAction::Send { command, payload }
    }
}
