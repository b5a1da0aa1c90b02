use std::fs;
use std::io::ErrorKind;
use std::rc::Rc;

use lalrpop_util::lexer::Token;
use lalrpop_util::ParseError;
use regex::{Captures, Regex};
use thiserror::Error;

use crate::backend::backend::InvalidLoad;
use crate::cpu::CPUConfig;
use crate::instructions::instructions::{get_opcode, Instr, Operand, Program, RegisterType, WordType};
use crate::loader::ast::Number;
use crate::program::NumbersParser;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{0}")]
    ParseError(String),

    #[error("{}", .0.join("\n"))]
    AnalysisError(Vec<String>),

    #[error("{0}")]
    NotFoundError(String),

    #[error("{0}")]
    IOError(String),

    #[error(transparent)]
    InvalidLoad(#[from] InvalidLoad),
}

struct Loader<'a> {
    cpu_config: CPUConfig,
    src: &'a str,
    numbers: Vec<Number>,
    next: usize,
    errors: Vec<String>,
}

impl<'a> Loader<'a> {
    fn load(&mut self) -> Option<Program> {
        let count_pos = self.numbers.get(self.next).map(|number| number.pos);
        let instr_cnt = self.next_count("the instruction count")?;
        let cycle_budget = self.next_count("the cycle budget")?;

        // every instruction takes 4 numbers; the count can't be trusted beyond what follows
        let remaining = (self.numbers.len() - self.next) as u64;
        if instr_cnt.checked_mul(4).map_or(true, |needed| needed > remaining) {
            let (line, column) = self.line_column(count_pos.unwrap_or(0));
            self.errors.push(format!("Instruction count {} at [{}:{}] exceeds the {} numbers that follow",
                                     instr_cnt, line, column, remaining));
            return None;
        }

        let mut code = Vec::with_capacity(instr_cnt as usize);
        for k in 0..instr_cnt {
            if let Some(instr) = self.parse_instr(k) {
                code.push(Rc::new(instr));
            }
        }

        let reg_cnt = self.cpu_config.arch_reg_count;
        let mut registers = Vec::with_capacity(reg_cnt as usize);
        for reg in 0..reg_cnt {
            let what = format!("the initial value of R{}", reg);
            registers.push(self.next_value(&what)?);
        }

        if let Some(extra) = self.numbers.get(self.next) {
            let (line, column) = self.line_column(extra.pos);
            self.errors.push(format!(
                "Unexpected number '{}' at [{}:{}]; expected {} instructions followed by {} register values",
                extra.text, line, column, instr_cnt, reg_cnt));
        }

        if self.errors.is_empty() {
            Some(Program { code, registers, cycle_budget })
        } else {
            None
        }
    }

    fn parse_instr(&mut self, k: u64) -> Option<Instr> {
        let what = format!("the opcode of instruction {}", k);
        let opcode_pos = self.numbers.get(self.next).map(|number| number.pos);
        let opcode_value = self.next_value(&what)?;
        let (line, column) = self.line_column(opcode_pos.unwrap_or(0));

        let sink = self.next_register(k);
        let left = self.next_register(k);
        let right = self.next_register(k);

        let opcode = match get_opcode(opcode_value) {
            Some(opcode) => opcode,
            None => {
                self.errors.push(format!("Unknown opcode '{}' at [{}:{}]", opcode_value, line, column));
                return None;
            }
        };

        Some(Instr {
            opcode,
            sink: sink?,
            source: [Operand::Register(left?), Operand::Register(right?)],
            line: Some(line),
        })
    }

    fn next_register(&mut self, k: u64) -> Option<RegisterType> {
        let pos = self.numbers.get(self.next).map(|number| number.pos);
        let value = self.next_value(&format!("a register of instruction {}", k))?;

        if value < 0 || value >= self.cpu_config.arch_reg_count as WordType {
            let (line, column) = self.line_column(pos.unwrap_or(0));
            self.errors.push(format!("Illegal register '{}' at [{}:{}]; there are {} registers",
                                     value, line, column, self.cpu_config.arch_reg_count));
            return None;
        }

        Some(value as RegisterType)
    }

    fn next_count(&mut self, what: &str) -> Option<u64> {
        let pos = self.numbers.get(self.next).map(|number| number.pos);
        let value = self.next_value(what)?;

        if value < 0 {
            let (line, column) = self.line_column(pos.unwrap_or(0));
            self.errors.push(format!("Expected a non-negative number for {} at [{}:{}], but found '{}'", what, line, column, value));
            return None;
        }

        Some(value as u64)
    }

    // Consumes the next number. A missing number ends the analysis.
    fn next_value(&mut self, what: &str) -> Option<WordType> {
        let number = match self.numbers.get(self.next) {
            Some(number) => number,
            None => {
                self.errors.push(format!("Unexpected end of file; expected {}", what));
                return None;
            }
        };
        self.next += 1;

        match number.text.parse::<WordType>() {
            Ok(value) => Some(value),
            Err(_) => {
                let text = number.text.clone();
                let (line, column) = self.line_column(number.pos);
                self.errors.push(format!("Number '{}' at [{}:{}] doesn't fit a word", text, line, column));
                None
            }
        }
    }

    fn line_column(&self, pos: usize) -> (usize, usize) {
        line_column(self.src, pos)
    }
}

fn line_column(src: &str, pos: usize) -> (usize, usize) {
    let before = &src[..pos.min(src.len())];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |index| index + 1);
    (line, before.len() - line_start + 1)
}

// Blanks out comments so that the positions of the remaining tokens are retained.
fn strip_comments(src: &str) -> String {
    let re = Regex::new(r"#[^\n]*").unwrap();
    re.replace_all(src, |caps: &Captures| " ".repeat(caps[0].len())).into_owned()
}

fn parse_error_message(src: &str, error: ParseError<usize, Token<'_>, &'static str>) -> String {
    match error {
        ParseError::InvalidToken { location } => {
            let (line, column) = line_column(src, location);
            format!("Invalid token at [{}:{}]", line, column)
        }
        ParseError::UnrecognizedEof { location, .. } => {
            let (line, column) = line_column(src, location);
            format!("Unexpected end of file at [{}:{}]", line, column)
        }
        ParseError::UnrecognizedToken { token: (start, token, _), .. }
        | ParseError::ExtraToken { token: (start, token, _) } => {
            let (line, column) = line_column(src, start);
            format!("Unexpected '{}' at [{}:{}]", token, line, column)
        }
        ParseError::User { error } => error.to_string(),
    }
}

pub fn load_from_string(cpu_config: CPUConfig, src: String) -> Result<Program, LoadError> {
    let src = strip_comments(&src);

    let numbers = match NumbersParser::new().parse(&src) {
        Ok(numbers) => numbers,
        Err(error) => return Err(LoadError::ParseError(parse_error_message(&src, error))),
    };

    let mut loader = Loader {
        cpu_config,
        src: &src,
        numbers,
        next: 0,
        errors: Vec::new(),
    };

    match loader.load() {
        Some(program) => Ok(program),
        None => Err(LoadError::AnalysisError(loader.errors)),
    }
}

pub fn load(cpu_config: CPUConfig, path: &str) -> Result<Program, LoadError> {
    let src = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(LoadError::NotFoundError(format!("File '{}' not found", path)));
        }
        Err(err) => {
            return Err(LoadError::IOError(format!("Error reading file '{}': {}", path, err)));
        }
    };

    load_from_string(cpu_config, src)
}
