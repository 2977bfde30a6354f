// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod collaborators_test;
pub mod helpers;
pub mod postgres_claim_test;
pub mod routes_test;
pub mod runtime_test;
pub mod scheduler_test;
