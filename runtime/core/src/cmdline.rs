// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::*,
    clap::Parser,
    glib::{Error, FileError},
};

pub trait ServiceCmd<A, T, R>: Sized
where
    A: Parser,
    R: RuntimeOperation<T>,
{
    fn params(args: &A) -> (T, Option<LogLevel>);

    /// Label an error with its domain for the exit message. Service implementations override
    /// this for the protocol domains of their device; anything else falls through to the
    /// shared domains.
    fn specific_err_to_string(e: &Error) -> String {
        specific_err_to_string(e)
    }

    fn run() {
        // NOTE: clap(v3.2.20)::Parser::parse() can exit process with 2 when detecting any error
        // or printing help.
        let args = A::parse();
        let (params, log_level) = Self::params(&args);

        let code = R::new(params, log_level)
            .and_then(|mut runtime| {
                runtime.run()?;
                Ok(libc::EXIT_SUCCESS)
            })
            .map_err(|err| Self::specific_err_to_string(&err))
            .unwrap_or_else(|msg| {
                eprintln!("{}", msg);
                libc::EXIT_FAILURE
            });

        std::process::exit(code)
    }
}

pub fn specific_err_to_string(e: &Error) -> String {
    let (domain, cause) = if let Some(error) = e.kind::<FileError>() {
        (
            "Linux file operation error",
            match error {
                FileError::Acces => "Access permission",
                FileError::Isdir => "Is directory",
                FileError::Noent => "Not exists",
                _ => "",
            },
        )
    } else {
        ("Unknown domain error", "")
    };
    format!("{}: {}, {}", domain, cause, e)
}
