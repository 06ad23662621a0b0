// SPDX-License-Identifier: MIT

//! External service collaborators used by the sample agents

pub mod gourmet;
