//! Runtime paths and limits used by the strategies

use std::env;

/// Fixed cost of starting a runtime, subtracted from measured usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaseOverhead {
    pub time_ms: u64,
    pub memory_bytes: u64,
}

/// JavaScript modules required by the JSDOM template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsModules {
    pub mocha: String,
    pub chai: String,
    pub jsdom: String,
    pub jquery: String,
    pub handlebars: String,
    pub sinon: String,
    pub sinon_chai: String,
    pub underscore: String,
}

/// Strategy settings loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategySettings {
    /// Python 3 interpreter
    pub python_path: String,

    /// Node.js executable
    pub nodejs_path: String,

    /// C++ compiler
    pub cpp_compiler_path: String,

    pub js_modules: JsModules,

    /// Compile step limits
    pub compile_time_limit_ms: u64,
    pub compile_memory_limit_bytes: u64,

    /// Postgres `statement_timeout` applied inside each test scope
    pub sql_statement_timeout_ms: u64,

    pub python_overhead: BaseOverhead,
    pub nodejs_overhead: BaseOverhead,
    pub cpp_overhead: BaseOverhead,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl StrategySettings {
    /// Load settings from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        let modules = string("NODE_MODULES_PATH", "/usr/lib/node_modules");
        let module = |key: &str, name: &str| string(key, &format!("{modules}/{name}"));

        Self {
            python_path: string("PYTHON_PATH", "/usr/bin/python3"),
            nodejs_path: string("NODEJS_PATH", "/usr/bin/node"),
            cpp_compiler_path: string("CPP_COMPILER_PATH", "/usr/bin/g++"),
            js_modules: JsModules {
                mocha: module("MOCHA_MODULE_PATH", "mocha/bin/_mocha"),
                chai: module("CHAI_MODULE_PATH", "chai"),
                jsdom: module("JSDOM_MODULE_PATH", "jsdom"),
                jquery: module("JQUERY_MODULE_PATH", "jquery"),
                handlebars: module("HANDLEBARS_MODULE_PATH", "handlebars"),
                sinon: module("SINON_MODULE_PATH", "sinon"),
                sinon_chai: module("SINON_CHAI_MODULE_PATH", "sinon-chai"),
                underscore: module("UNDERSCORE_MODULE_PATH", "underscore"),
            },
            compile_time_limit_ms: number("COMPILE_TIME_LIMIT_MS", 10_000),
            compile_memory_limit_bytes: number("COMPILE_MEMORY_LIMIT_BYTES", 512 * 1024 * 1024),
            sql_statement_timeout_ms: number("SQL_STATEMENT_TIMEOUT_MS", 3_000),
            python_overhead: BaseOverhead {
                time_ms: number("PYTHON_BASE_TIME_MS", 0),
                memory_bytes: number("PYTHON_BASE_MEMORY_BYTES", 0),
            },
            nodejs_overhead: BaseOverhead {
                time_ms: number("NODEJS_BASE_TIME_MS", 0),
                memory_bytes: number("NODEJS_BASE_MEMORY_BYTES", 0),
            },
            cpp_overhead: BaseOverhead {
                time_ms: number("CPP_BASE_TIME_MS", 0),
                memory_bytes: number("CPP_BASE_MEMORY_BYTES", 0),
            },
        }
    }
}
